//! The provisioning capability the engine drives.
//!
//! A provider turns a fully resolved resource definition into a physical
//! resource and reports the attributes other nodes may reference. It also
//! runs one-shot tasks for the bootstrap workflow. Failures are opaque to
//! the engine and surface as `anyhow::Error`.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tierform_graph::ResourceKind;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// A resource whose references have all been replaced by literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub environment: String,
    pub logical_id: String,
    pub kind: ResourceKind,
}

/// What a provider hands back after creating or updating a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provisioned {
    pub physical_id: String,
    pub attributes: BTreeMap<String, String>,
}

/// A single run of the bootstrap job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLaunch {
    pub environment: String,
    pub execution_id: String,
    pub cluster: String,
    pub task_definition: String,
    pub security_groups: Vec<String>,
    pub assign_public_ip: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub exit_code: i32,
}

pub trait Provider: Send + Sync {
    fn create<'a>(&'a self, request: &'a ProvisionRequest) -> BoxFuture<'a, Provisioned>;

    fn update<'a>(
        &'a self,
        request: &'a ProvisionRequest,
        physical_id: &'a str,
    ) -> BoxFuture<'a, Provisioned>;

    fn delete<'a>(&'a self, kind: &'a str, physical_id: &'a str) -> BoxFuture<'a, ()>;

    /// Run the task to completion and report its exit code.
    fn run_task<'a>(&'a self, launch: &'a TaskLaunch) -> BoxFuture<'a, TaskOutcome>;
}
