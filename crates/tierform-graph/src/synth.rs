//! Template synthesis: one JSON document per stack.
//!
//! Each template lists its resources (type, properties, explicit ordering)
//! and outputs. References to nodes that live in another stack are collected
//! under `Imports` so the consumer can see the cross-stack wiring.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map};

use crate::error::{GraphError, GraphResult};
use crate::graph::ProvisioningGraph;
use crate::node::StackName;

/// Render every stack of the graph.
pub fn synthesize(graph: &ProvisioningGraph) -> GraphResult<BTreeMap<StackName, serde_json::Value>> {
    StackName::ALL
        .iter()
        .map(|&stack| Ok((stack, synthesize_stack(graph, stack)?)))
        .collect()
}

pub fn synthesize_stack(graph: &ProvisioningGraph, stack: StackName) -> GraphResult<serde_json::Value> {
    let mut resources = Map::new();
    let mut imports = BTreeSet::new();

    for node in graph.nodes_in_stack(stack) {
        let mut entry = match serde_json::to_value(&node.kind)
            .map_err(|e| GraphError::Invalid(format!("{}: {e}", node.id)))?
        {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(GraphError::Invalid(format!(
                    "{}: expected object, got {other}",
                    node.id
                )));
            }
        };
        if !node.depends_on.is_empty() {
            entry.insert("DependsOn".to_string(), json!(node.depends_on));
        }
        for r in node.references() {
            if let Some(target) = graph.node(r.node())
                && target.stack != stack
            {
                imports.insert(format!("{}.{}", target.stack.label(), r));
            }
        }
        resources.insert(node.id.clone(), serde_json::Value::Object(entry));
    }

    let mut outputs = Map::new();
    for output in graph.outputs().iter().filter(|o| o.stack == stack) {
        outputs.insert(output.name.clone(), json!({ "Value": output.value }));
    }

    let mut template = Map::new();
    template.insert("Stack".to_string(), json!(stack.label()));
    template.insert("Resources".to_string(), serde_json::Value::Object(resources));
    if !outputs.is_empty() {
        template.insert("Outputs".to_string(), serde_json::Value::Object(outputs));
    }
    if !imports.is_empty() {
        template.insert("Imports".to_string(), json!(imports));
    }
    Ok(serde_json::Value::Object(template))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{GATE, TRIGGER};
    use crate::service::SERVICE;
    use crate::topology::build_topology;
    use tierform_core::{DeployContext, TierformConfig};

    fn templates() -> BTreeMap<StackName, serde_json::Value> {
        let topo = build_topology(&TierformConfig::default(), &DeployContext::new()).unwrap();
        synthesize(&topo.graph).unwrap()
    }

    #[test]
    fn one_template_per_stack() {
        let t = templates();
        assert_eq!(t.len(), 3);
        assert_eq!(t[&StackName::Registry]["Stack"], "registry");
        assert!(t[&StackName::Registry]["Resources"]["OnlineShoppingRepo"].is_object());
    }

    #[test]
    fn service_carries_explicit_dependency() {
        let t = templates();
        let service = &t[&StackName::Application]["Resources"][SERVICE];
        assert_eq!(service["Type"], "Service");
        assert_eq!(service["DependsOn"], json!([GATE]));
        assert_eq!(
            t[&StackName::Application]["Resources"][TRIGGER]["DependsOn"],
            json!(["OnlineShoppingDB"])
        );
    }

    #[test]
    fn application_outputs_are_references() {
        let t = templates();
        let outputs = &t[&StackName::Application]["Outputs"];
        assert_eq!(
            outputs["RDSEndpoint"]["Value"],
            json!({"Fn::GetAtt": ["OnlineShoppingDB", "endpoint_address"]})
        );
        assert_eq!(
            outputs["LoadBalancerURL"]["Value"],
            json!({"Fn::GetAtt": ["MyFargateServiceLB", "dns_name"]})
        );
    }

    #[test]
    fn delivery_imports_repository_and_service() {
        let t = templates();
        let imports = t[&StackName::Delivery]["Imports"].as_array().unwrap();
        let imports: Vec<&str> = imports.iter().filter_map(|v| v.as_str()).collect();
        assert!(imports.contains(&"registry.OnlineShoppingRepo.repository_uri"));
        assert!(imports.contains(&"application.MyFargateService.id"));
    }
}
