//! Typed resource nodes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tierform_core::{AttrRef, LogicalId};

use crate::resources::ResourceKind;

/// Which logical stack a node is synthesized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackName {
    /// Image repository.
    Registry,
    /// Network, database, bootstrap workflow and application service.
    Application,
    /// Build project and pipeline.
    Delivery,
}

impl StackName {
    pub fn label(&self) -> &'static str {
        match self {
            StackName::Registry => "registry",
            StackName::Application => "application",
            StackName::Delivery => "delivery",
        }
    }

    pub const ALL: [StackName; 3] = [StackName::Registry, StackName::Application, StackName::Delivery];
}

/// A single resource in the provisioning graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: LogicalId,
    pub stack: StackName,
    pub kind: ResourceKind,
    /// Explicit ordering edges, in addition to those implied by references.
    pub depends_on: BTreeSet<LogicalId>,
}

impl ResourceNode {
    pub fn new(id: &str, stack: StackName, kind: ResourceKind) -> Self {
        Self {
            id: id.to_string(),
            stack,
            kind,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn depends_on(mut self, id: &str) -> Self {
        self.depends_on.insert(id.to_string());
        self
    }

    /// Every attribute reference appearing anywhere in the properties.
    pub fn references(&self) -> BTreeSet<AttrRef> {
        let mut refs = BTreeSet::new();
        if let Ok(json) = serde_json::to_value(&self.kind) {
            collect_refs(&json, &mut refs);
        }
        refs
    }

    /// Logical ids this node must follow: explicit edges plus referenced nodes.
    pub fn prerequisites(&self) -> BTreeSet<LogicalId> {
        let mut all = self.depends_on.clone();
        all.extend(self.references().into_iter().map(|r| r.node().to_string()));
        all.remove(&self.id);
        all
    }
}

fn collect_refs(value: &serde_json::Value, out: &mut BTreeSet<AttrRef>) {
    match value {
        serde_json::Value::Object(map) => {
            if map.len() == 1
                && let Some(serde_json::Value::Array(pair)) = map.get("Fn::GetAtt")
                && let [serde_json::Value::String(node), serde_json::Value::String(attribute)] =
                    pair.as_slice()
            {
                out.insert(AttrRef::new(node, attribute));
                return;
            }
            for v in map.values() {
                collect_refs(v, out);
            }
        }
        serde_json::Value::Array(items) => {
            for v in items {
                collect_refs(v, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{ClusterProps, SecurityGroupProps};
    use tierform_core::Value;

    #[test]
    fn references_found_in_nested_properties() {
        let node = ResourceNode::new(
            "InitTaskSG",
            StackName::Application,
            ResourceKind::SecurityGroup(SecurityGroupProps {
                network: Value::attr("MyVpc", "id"),
                description: "init".to_string(),
                allow_all_outbound: true,
                ingress: vec![],
            }),
        );
        let refs = node.references();
        assert_eq!(refs.len(), 1);
        assert!(refs.contains(&AttrRef::new("MyVpc", "id")));
    }

    #[test]
    fn prerequisites_merge_explicit_and_implied() {
        let node = ResourceNode::new(
            "MyCluster",
            StackName::Application,
            ResourceKind::Cluster(ClusterProps {
                network: Value::attr("MyVpc", "id"),
            }),
        )
        .depends_on("Other");
        let prereqs: Vec<_> = node.prerequisites().into_iter().collect();
        assert_eq!(prereqs, vec!["MyVpc".to_string(), "Other".to_string()]);
    }
}
