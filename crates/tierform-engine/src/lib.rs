//! tierform-engine — provisions a graph against a provider.
//!
//! The executor runs the graph in topological waves, parallel within a
//! wave, and records every provisioned resource in the state store so a
//! second run only touches what changed. The bootstrap trigger is a keyed
//! create-if-absent, so repeated runs never start a second execution.
//!
//! # Components
//!
//! - **`provider`** — the `Provider` trait the engine drives
//! - **`memory`** — in-process provider with failure injection
//! - **`resolve`** — reference substitution and change fingerprints
//! - **`workflow`** — bootstrap workflow runner with timeout
//! - **`executor`** — wave execution, gate waits, rollback

pub mod error;
pub mod executor;
pub mod memory;
pub mod provider;
pub mod resolve;
pub mod workflow;

pub use error::{EngineError, EngineResult};
pub use executor::{Change, DeployReport, Executor};
pub use memory::{InMemoryProvider, ProviderCall};
pub use provider::{BoxFuture, Provider, ProvisionRequest, Provisioned, TaskLaunch, TaskOutcome};
