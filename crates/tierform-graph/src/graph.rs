//! The provisioning graph: nodes, dependency edges, outputs.
//!
//! Edges come from two places: explicit `depends_on` entries and attribute
//! references inside node properties. Both mean "from must be provisioned
//! before to". The graph is validated acyclic at build time; execution order
//! is expressed as waves of nodes whose prerequisites are all in earlier
//! waves.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tierform_core::{LogicalId, Value};
use tracing::debug;

use crate::error::{GraphError, GraphResult};
use crate::node::{ResourceNode, StackName};

/// Index into the node list.
pub type NodeIndex = usize;

/// A value exposed to the operator after provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    pub stack: StackName,
    pub value: Value,
}

/// A validated, acyclic provisioning graph.
#[derive(Debug, Clone)]
pub struct ProvisioningGraph {
    nodes: Vec<ResourceNode>,
    index_map: HashMap<LogicalId, NodeIndex>,
    /// index -> nodes that must follow it
    forward_edges: Vec<Vec<NodeIndex>>,
    /// index -> nodes it must follow
    reverse_edges: Vec<Vec<NodeIndex>>,
    outputs: Vec<Output>,
}

impl ProvisioningGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&ResourceNode> {
        self.index_map.get(id).map(|&i| &self.nodes[i])
    }

    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.index_map.get(id).copied()
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Direct prerequisites of a node.
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.index_of(id)
            .map(|i| {
                self.reverse_edges[i]
                    .iter()
                    .map(|&d| self.nodes[d].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Nodes that directly depend on this node.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.index_of(id)
            .map(|i| {
                self.forward_edges[i]
                    .iter()
                    .map(|&d| self.nodes[d].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True if `before` is a (transitive) prerequisite of `after`.
    pub fn precedes(&self, before: &str, after: &str) -> bool {
        let (Some(start), Some(target)) = (self.index_of(after), self.index_of(before)) else {
            return false;
        };
        let mut stack = vec![start];
        let mut seen = BTreeSet::new();
        while let Some(i) = stack.pop() {
            for &dep in &self.reverse_edges[i] {
                if dep == target {
                    return true;
                }
                if seen.insert(dep) {
                    stack.push(dep);
                }
            }
        }
        false
    }

    /// Group nodes into waves: every node's prerequisites sit in earlier waves.
    /// Nodes within a wave are independent and may be provisioned concurrently.
    pub fn waves(&self) -> Vec<Vec<LogicalId>> {
        let mut in_degree: Vec<usize> = self.reverse_edges.iter().map(Vec::len).collect();
        let mut current: Vec<NodeIndex> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut waves = Vec::new();

        while !current.is_empty() {
            let mut next = Vec::new();
            for &i in &current {
                for &dependent in &self.forward_edges[i] {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            let mut ids: Vec<LogicalId> = current.iter().map(|&i| self.nodes[i].id.clone()).collect();
            ids.sort();
            waves.push(ids);
            current = next;
        }
        waves
    }

    /// A single topological order (waves flattened).
    pub fn topological_order(&self) -> Vec<LogicalId> {
        self.waves().into_iter().flatten().collect()
    }

    /// Wave number of each node.
    pub fn wave_of(&self) -> BTreeMap<LogicalId, usize> {
        self.waves()
            .into_iter()
            .enumerate()
            .flat_map(|(w, ids)| ids.into_iter().map(move |id| (id, w)))
            .collect()
    }

    pub fn nodes_in_stack(&self, stack: StackName) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.iter().filter(move |n| n.stack == stack)
    }
}

/// Builder for provisioning graphs.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<ResourceNode>,
    outputs: Vec<Output>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Logical ids must be unique.
    pub fn add(&mut self, node: ResourceNode) -> GraphResult<()> {
        if self.nodes.iter().any(|n| n.id == node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        debug!(id = %node.id, kind = node.kind.label(), "node added");
        self.nodes.push(node);
        Ok(())
    }

    /// Add an explicit ordering edge: `before` must be provisioned first.
    pub fn add_dependency(&mut self, after: &str, before: &str) -> GraphResult<()> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == after)
            .ok_or_else(|| GraphError::Invalid(format!("no node named '{after}'")))?;
        node.depends_on.insert(before.to_string());
        Ok(())
    }

    pub fn output(&mut self, name: &str, stack: StackName, value: Value) {
        self.outputs.push(Output {
            name: name.to_string(),
            stack,
            value,
        });
    }

    /// Build the graph.
    ///
    /// Validates that explicit dependencies and references name existing
    /// nodes and that there are no cycles.
    pub fn build(self) -> GraphResult<ProvisioningGraph> {
        let mut index_map = HashMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            index_map.insert(node.id.clone(), i);
        }

        let mut forward_edges: Vec<Vec<NodeIndex>> = vec![Vec::new(); self.nodes.len()];
        let mut reverse_edges: Vec<Vec<NodeIndex>> = vec![Vec::new(); self.nodes.len()];

        for (to_idx, node) in self.nodes.iter().enumerate() {
            for dep in &node.depends_on {
                if !index_map.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        node: node.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            for r in node.references() {
                if !index_map.contains_key(r.node()) {
                    return Err(GraphError::UnknownReference {
                        node: node.id.clone(),
                        target: r.node().to_string(),
                    });
                }
            }
            for dep in node.prerequisites() {
                let from_idx = index_map[&dep];
                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }

        for output in &self.outputs {
            if let Some(r) = output.value.as_ref_target()
                && !index_map.contains_key(r.node())
            {
                return Err(GraphError::UnknownReference {
                    node: format!("output {}", output.name),
                    target: r.node().to_string(),
                });
            }
        }

        let graph = ProvisioningGraph {
            nodes: self.nodes,
            index_map,
            forward_edges,
            reverse_edges,
            outputs: self.outputs,
        };
        validate_no_cycles(&graph)?;
        Ok(graph)
    }
}

/// Kahn's algorithm; any node never reaching in-degree zero sits on a cycle.
fn validate_no_cycles(graph: &ProvisioningGraph) -> GraphResult<()> {
    let placed: usize = graph.waves().iter().map(Vec::len).sum();
    if placed == graph.len() {
        return Ok(());
    }
    let placed_ids: BTreeSet<LogicalId> = graph.topological_order().into_iter().collect();
    let mut stuck: Vec<&str> = graph
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| !placed_ids.contains(*id))
        .collect();
    stuck.sort();
    Err(GraphError::Cycle(stuck.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{ClusterProps, RepositoryProps, ResourceKind};

    fn repo(id: &str) -> ResourceNode {
        ResourceNode::new(
            id,
            StackName::Registry,
            ResourceKind::ImageRepository(RepositoryProps { name: id.to_lowercase() }),
        )
    }

    fn cluster_on(id: &str, target: &str) -> ResourceNode {
        ResourceNode::new(
            id,
            StackName::Application,
            ResourceKind::Cluster(ClusterProps {
                network: Value::attr(target, "id"),
            }),
        )
    }

    #[test]
    fn waves_respect_references_and_explicit_edges() {
        let mut b = GraphBuilder::new();
        b.add(repo("A")).unwrap();
        b.add(repo("B")).unwrap();
        b.add(cluster_on("C", "A")).unwrap();
        b.add(repo("D").depends_on("C")).unwrap();
        let graph = b.build().unwrap();

        let waves = graph.waves();
        assert_eq!(waves, vec![vec!["A", "B"], vec!["C"], vec!["D"]]);
        assert!(graph.precedes("A", "D"));
        assert!(!graph.precedes("B", "D"));
        assert_eq!(graph.dependencies("C"), vec!["A"]);
        assert_eq!(graph.dependents("A"), vec!["C"]);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let mut b = GraphBuilder::new();
        b.add(repo("A")).unwrap();
        assert_eq!(b.add(repo("A")), Err(GraphError::DuplicateNode("A".to_string())));
    }

    #[test]
    fn unknown_reference_rejected() {
        let mut b = GraphBuilder::new();
        b.add(cluster_on("C", "Missing")).unwrap();
        let err = b.build().unwrap_err();
        assert!(matches!(err, GraphError::UnknownReference { .. }));
    }

    #[test]
    fn unknown_explicit_dependency_rejected() {
        let mut b = GraphBuilder::new();
        b.add(repo("A").depends_on("Ghost")).unwrap();
        assert!(matches!(
            b.build().unwrap_err(),
            GraphError::UnknownDependency { .. }
        ));
    }

    #[test]
    fn cycle_detected() {
        let mut b = GraphBuilder::new();
        b.add(cluster_on("X", "Y")).unwrap();
        b.add(cluster_on("Y", "X")).unwrap();
        b.add(repo("Z")).unwrap();
        match b.build().unwrap_err() {
            GraphError::Cycle(nodes) => assert_eq!(nodes, "X, Y"),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_reference_is_not_an_edge() {
        let mut b = GraphBuilder::new();
        b.add(cluster_on("S", "S")).unwrap();
        let graph = b.build().unwrap();
        assert_eq!(graph.waves(), vec![vec!["S"]]);
    }

    #[test]
    fn output_must_reference_known_node() {
        let mut b = GraphBuilder::new();
        b.add(repo("A")).unwrap();
        b.output("Uri", StackName::Registry, Value::attr("Nope", "repository_uri"));
        assert!(b.build().is_err());
    }
}
