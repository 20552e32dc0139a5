//! Shared types used across tierform crates.

use serde::{Deserialize, Serialize};

/// Logical identifier of a node in a provisioning graph (e.g. `OnlineShoppingDB`).
pub type LogicalId = String;

/// Reference to an attribute that only exists once a resource is provisioned.
///
/// Serializes as `{"Fn::GetAtt": [node, attribute]}` in synthesized templates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttrRef {
    #[serde(rename = "Fn::GetAtt")]
    pub target: (LogicalId, String),
}

impl AttrRef {
    pub fn new(node: &str, attribute: &str) -> Self {
        Self {
            target: (node.to_string(), attribute.to_string()),
        }
    }

    pub fn node(&self) -> &str {
        &self.target.0
    }

    pub fn attribute(&self) -> &str {
        &self.target.1
    }
}

impl std::fmt::Display for AttrRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.target.0, self.target.1)
    }
}

/// A property value: either known at synthesis time or resolved by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Literal(String),
    Ref(AttrRef),
}

impl Value {
    pub fn literal(s: impl Into<String>) -> Self {
        Value::Literal(s.into())
    }

    pub fn attr(node: &str, attribute: &str) -> Self {
        Value::Ref(AttrRef::new(node, attribute))
    }

    pub fn as_ref_target(&self) -> Option<&AttrRef> {
        match self {
            Value::Literal(_) => None,
            Value::Ref(r) => Some(r),
        }
    }

    /// Resolve against provisioned attributes. Literals always resolve.
    pub fn resolve<F>(&self, lookup: F) -> Option<String>
    where
        F: Fn(&AttrRef) -> Option<String>,
    {
        match self {
            Value::Literal(s) => Some(s.clone()),
            Value::Ref(r) => lookup(r),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Literal(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Literal(s)
    }
}

/// CPU units and memory for a task (1024 units = 1 vCPU).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSizing {
    pub cpu: u32,
    pub memory_mib: u32,
}

impl TaskSizing {
    /// Sizing used by the bootstrap-mode service and the init job.
    pub const FIXED: TaskSizing = TaskSizing {
        cpu: 256,
        memory_mib: 512,
    };
}

impl Default for TaskSizing {
    fn default() -> Self {
        Self::FIXED
    }
}

/// Which subnet tier a resource is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetType {
    Public,
    Private,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_ref_serializes_as_get_att() {
        let v = Value::attr("OnlineShoppingDB", "endpoint_address");
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"Fn::GetAtt":["OnlineShoppingDB","endpoint_address"]}"#);

        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn literal_serializes_as_string() {
        let json = serde_json::to_string(&Value::literal("rootroot")).unwrap();
        assert_eq!(json, "\"rootroot\"");
    }

    #[test]
    fn resolve_uses_lookup_for_refs() {
        let v = Value::attr("Db", "endpoint_address");
        let resolved = v.resolve(|r| (r.node() == "Db").then(|| "db.local".to_string()));
        assert_eq!(resolved.as_deref(), Some("db.local"));
        assert_eq!(Value::literal("x").resolve(|_| None).as_deref(), Some("x"));
    }
}
