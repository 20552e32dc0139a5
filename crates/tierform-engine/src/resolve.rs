//! Attribute resolution and change fingerprints.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use sha2::{Digest, Sha256};
use tierform_core::{AttrRef, Value};
use tierform_graph::{ProvisioningGraph, ResourceKind};

use crate::error::{EngineError, EngineResult};

/// Attributes reported for each provisioned node, by logical id.
pub type AttributeMap = HashMap<String, BTreeMap<String, String>>;

const GET_ATT: &str = "Fn::GetAtt";

pub fn lookup(attrs: &AttributeMap, r: &AttrRef) -> Option<String> {
    attrs.get(r.node()).and_then(|a| a.get(r.attribute())).cloned()
}

/// Literal value of an already resolved property.
pub fn literal(value: &Value) -> Option<&str> {
    match value {
        Value::Literal(s) => Some(s),
        Value::Ref(_) => None,
    }
}

/// Replace every attribute reference in `kind` with its provisioned value.
pub fn resolve_kind(node: &str, kind: &ResourceKind, attrs: &AttributeMap) -> EngineResult<ResourceKind> {
    let mut json =
        serde_json::to_value(kind).map_err(|e| EngineError::Serialize(format!("{node}: {e}")))?;
    substitute(&mut json, attrs).map_err(|reference| EngineError::Unresolved {
        node: node.to_string(),
        reference,
    })?;
    serde_json::from_value(json).map_err(|e| EngineError::Serialize(format!("{node}: {e}")))
}

fn substitute(value: &mut serde_json::Value, attrs: &AttributeMap) -> Result<(), String> {
    if let Some(r) = as_attr_ref(value) {
        let resolved = lookup(attrs, &r).ok_or_else(|| r.to_string())?;
        *value = serde_json::Value::String(resolved);
        return Ok(());
    }
    match value {
        serde_json::Value::Object(map) => {
            for child in map.values_mut() {
                substitute(child, attrs)?;
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                substitute(item, attrs)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn as_attr_ref(value: &serde_json::Value) -> Option<AttrRef> {
    match value {
        serde_json::Value::Object(map) if map.len() == 1 && map.contains_key(GET_ATT) => {
            serde_json::from_value(value.clone()).ok()
        }
        _ => None,
    }
}

/// Digest of a resolved definition plus its explicit ordering edges.
pub fn fingerprint(kind: &ResourceKind, depends_on: &BTreeSet<String>) -> EngineResult<String> {
    let body = serde_json::to_vec(&(kind, depends_on))
        .map_err(|e| EngineError::Serialize(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&body)))
}

/// Resolve the graph's outputs; unresolvable outputs are left out.
pub fn resolve_outputs(graph: &ProvisioningGraph, attrs: &AttributeMap) -> BTreeMap<String, String> {
    graph
        .outputs()
        .iter()
        .filter_map(|o| {
            o.value
                .resolve(|r| lookup(attrs, r))
                .map(|v| (o.name.clone(), v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierform_graph::resources::{ClusterProps, GrantProps, RepositoryAccess};

    fn attrs() -> AttributeMap {
        HashMap::from([(
            "Repo".to_string(),
            BTreeMap::from([
                ("arn".to_string(), "arn:repo".to_string()),
                ("id".to_string(), "repo-1".to_string()),
            ]),
        )])
    }

    #[test]
    fn references_become_literals() {
        let kind = ResourceKind::AccessGrant(GrantProps {
            repository: Value::attr("Repo", "arn"),
            principal: Value::literal("role"),
            access: RepositoryAccess::Pull,
        });
        let ResourceKind::AccessGrant(g) = resolve_kind("Grant", &kind, &attrs()).unwrap() else {
            panic!("expected grant");
        };
        assert_eq!(g.repository, Value::literal("arn:repo"));
        assert_eq!(g.principal, Value::literal("role"));
    }

    #[test]
    fn missing_attribute_is_unresolved() {
        let kind = ResourceKind::Cluster(ClusterProps {
            network: Value::attr("Repo", "dns_name"),
        });
        match resolve_kind("C", &kind, &attrs()).unwrap_err() {
            EngineError::Unresolved { node, reference } => {
                assert_eq!(node, "C");
                assert_eq!(reference, "Repo.dns_name");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fingerprint_tracks_properties_and_edges() {
        let a = ResourceKind::Cluster(ClusterProps {
            network: Value::literal("vpc-1"),
        });
        let b = ResourceKind::Cluster(ClusterProps {
            network: Value::literal("vpc-2"),
        });
        let none = BTreeSet::new();
        let edge = BTreeSet::from(["X".to_string()]);
        assert_eq!(fingerprint(&a, &none).unwrap(), fingerprint(&a, &none).unwrap());
        assert_ne!(fingerprint(&a, &none).unwrap(), fingerprint(&b, &none).unwrap());
        assert_ne!(fingerprint(&a, &none).unwrap(), fingerprint(&a, &edge).unwrap());
    }
}
