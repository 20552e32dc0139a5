//! redb table definitions for the tierform state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Provisioned resources keyed by `{environment}/{logical_id}`.
pub const RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");

/// Bootstrap workflow executions keyed by `{environment}/{execution_id}`.
pub const EXECUTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("executions");

/// Running services keyed by `{environment}/{service}`.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// CPU snapshots keyed by `{service_id}:{epoch:020}`.
pub const METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("metrics");

/// Pipeline executions keyed by `{pipeline}:{sequence:010}`.
pub const PIPELINE_RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("pipeline_runs");
