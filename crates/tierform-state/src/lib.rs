//! tierform-state — the provisioning ledger.
//!
//! Backed by [redb](https://docs.rs/redb), records what the engine has
//! provisioned per environment: resource records, bootstrap workflow
//! executions, running services, CPU metric snapshots and pipeline runs.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{environment}/{id}`, `{service_id}:{epoch}`) enable
//! prefix scans for related records. Workflow executions are written with a
//! keyed create-if-absent so a fixed physical id yields at most one execution.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
