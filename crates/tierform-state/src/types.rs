//! Domain types for the tierform state store.
//!
//! These types represent what the engine has realized: resource records,
//! workflow executions, services, metrics and pipeline runs. All types are
//! serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Resources ─────────────────────────────────────────────────────

/// A provisioned resource, as last reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    pub environment: String,
    pub logical_id: String,
    /// Resource kind label (e.g. `database`, `service`).
    pub kind: String,
    /// Identifier assigned by the provider.
    pub physical_id: String,
    /// Attributes other resources can reference.
    pub attributes: BTreeMap<String, String>,
    /// Fingerprint of the resolved properties, used for change detection.
    pub fingerprint: String,
    /// Resolved definition last applied, used to restore an update.
    #[serde(default)]
    pub properties: serde_json::Value,
    /// Provisioning run that last created or updated this record.
    pub run_id: String,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ResourceRecord {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.environment, self.logical_id)
    }
}

// ── Workflow executions ───────────────────────────────────────────

/// Lifecycle of the bootstrap workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Succeeded | WorkflowStatus::Failed | WorkflowStatus::TimedOut
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Succeeded => "succeeded",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::TimedOut => "timed-out",
        }
    }
}

/// One execution of the bootstrap workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowExecution {
    pub environment: String,
    /// Fixed physical id of the trigger; at most one execution per id.
    pub execution_id: String,
    /// Physical id of the state machine that was started.
    pub state_machine: String,
    pub status: WorkflowStatus,
    pub exit_code: Option<i32>,
    pub reason: Option<String>,
    pub started_at: u64,
    pub finished_at: Option<u64>,
}

impl WorkflowExecution {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.environment, self.execution_id)
    }
}

// ── Services ──────────────────────────────────────────────────────

/// A container running inside a service's task definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerRecord {
    pub name: String,
    pub image: String,
    pub port: Option<u16>,
}

/// Runtime view of the application service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRecord {
    pub environment: String,
    pub name: String,
    pub physical_id: String,
    pub cluster: String,
    pub containers: Vec<ContainerRecord>,
    pub desired_count: u32,
    pub min_capacity: u32,
    pub max_capacity: u32,
    /// Incremented every time the running image set changes.
    pub revision: u32,
    pub updated_at: u64,
}

impl ServiceRecord {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.environment, self.name)
    }

    pub fn container(&self, name: &str) -> Option<&ContainerRecord> {
        self.containers.iter().find(|c| c.name == name)
    }
}

// ── Metrics ───────────────────────────────────────────────────────

/// Average CPU utilization of a service at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CpuSnapshot {
    /// `{environment}/{service}` key of the service.
    pub service_id: String,
    /// Unix timestamp (seconds).
    pub epoch: u64,
    /// Average CPU utilization across running tasks (0–100).
    pub avg_cpu_percent: f64,
    pub running_tasks: u32,
}

impl CpuSnapshot {
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.service_id, self.epoch)
    }
}

// ── Pipeline runs ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineRunStatus {
    InProgress,
    Succeeded,
    Failed,
    Superseded,
}

/// Persisted summary of one pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineRunRecord {
    pub pipeline: String,
    pub sequence: u64,
    pub revision: Option<String>,
    pub image_tag: Option<String>,
    pub status: PipelineRunStatus,
    /// Stage that failed or was running when superseded.
    pub stage: Option<String>,
    pub detail: Option<String>,
    pub started_at: u64,
    pub finished_at: Option<u64>,
}

impl PipelineRunRecord {
    pub fn table_key(&self) -> String {
        format!("{}:{:010}", self.pipeline, self.sequence)
    }
}
