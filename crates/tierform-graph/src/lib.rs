//! tierform-graph — the provisioning graph for one environment.
//!
//! Resources are typed nodes grouped into three logical stacks. Ordering
//! edges come from explicit `depends_on` entries and from attribute
//! references (`{"Fn::GetAtt": [node, attr]}`) found anywhere in a node's
//! properties. The builder rejects unknown targets and cycles, and the graph
//! exposes topological waves for the engine to execute.
//!
//! # Components
//!
//! - **`foundation`** — network, cluster, database, security groups
//! - **`registry`** — image repository and access grants
//! - **`bootstrap`** — init job, workflow, idempotent trigger, completion gate
//! - **`service`** — image selection, load-balanced service, CPU scaling
//! - **`delivery`** — build project and source → build → deploy pipeline
//! - **`topology`** — wires the layers together from config + context
//! - **`synth`** — per-stack JSON templates

pub mod bootstrap;
pub mod delivery;
pub mod error;
pub mod foundation;
pub mod graph;
pub mod node;
pub mod registry;
pub mod resources;
pub mod service;
pub mod synth;
pub mod topology;

pub use error::{GraphError, GraphResult};
pub use graph::{GraphBuilder, Output, ProvisioningGraph};
pub use node::{ResourceNode, StackName};
pub use resources::{attr, ResourceKind};
pub use synth::synthesize;
pub use topology::{build_topology, Topology};
