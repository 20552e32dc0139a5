//! In-process provider.
//!
//! Keeps live resources in a map, derives stable physical ids from the
//! environment and logical id, and fabricates the attributes a real provider
//! would report. Failures, task exit codes and task latency can be injected
//! for tests and dry runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail};
use sha2::{Digest, Sha256};
use tierform_graph::{attr, ResourceKind};
use tracing::debug;

use crate::provider::{BoxFuture, Provider, ProvisionRequest, Provisioned, TaskLaunch, TaskOutcome};

pub const REGISTRY_HOST: &str = "registry.tierform.local";

/// Stable physical id: lowercase logical id plus a short digest.
pub fn physical_id(environment: &str, logical_id: &str) -> String {
    let digest = Sha256::digest(format!("{environment}/{logical_id}").as_bytes());
    format!("{}-{}", logical_id.to_lowercase(), &hex::encode(digest)[..12])
}

/// A provider-side call, recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Create(String),
    Update(String),
    Delete(String),
    RunTask(String),
}

#[derive(Debug, Clone)]
pub struct LiveResource {
    pub logical_id: String,
    pub kind: ResourceKind,
}

#[derive(Default)]
struct Inner {
    live: BTreeMap<String, LiveResource>,
    calls: Vec<ProviderCall>,
    fail_on: BTreeSet<String>,
    task_exit_code: i32,
    task_delay: Duration,
}

#[derive(Default)]
pub struct InMemoryProvider {
    inner: Mutex<Inner>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make create/update of `logical_id` (or a task run for that execution
    /// id) fail.
    pub fn fail_on(&self, logical_id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_on.insert(logical_id.to_string());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_on.clear();
        }
    }

    pub fn set_task_exit_code(&self, code: i32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.task_exit_code = code;
        }
    }

    pub fn set_task_delay(&self, delay: Duration) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.task_delay = delay;
        }
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.inner.lock().map(|i| i.calls.clone()).unwrap_or_default()
    }

    pub fn live(&self) -> Vec<LiveResource> {
        self.inner
            .lock()
            .map(|i| i.live.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_live(&self, logical_id: &str) -> bool {
        self.live().iter().any(|r| r.logical_id == logical_id)
    }

    pub fn task_runs(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ProviderCall::RunTask(_)))
            .count()
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("provider state poisoned"))
    }

    fn apply(&self, request: &ProvisionRequest, existing: Option<&str>) -> anyhow::Result<Provisioned> {
        if matches!(
            request.kind,
            ResourceKind::WorkflowTrigger(_) | ResourceKind::BootstrapGate(_)
        ) {
            bail!("{} is handled by the engine", request.kind.label());
        }
        let mut inner = self.lock()?;
        let call = match existing {
            Some(_) => ProviderCall::Update(request.logical_id.clone()),
            None => ProviderCall::Create(request.logical_id.clone()),
        };
        inner.calls.push(call);
        if inner.fail_on.contains(&request.logical_id) {
            bail!("injected failure for {}", request.logical_id);
        }

        let physical = match existing {
            Some(id) => id.to_string(),
            None => physical_id(&request.environment, &request.logical_id),
        };
        inner.live.insert(
            physical.clone(),
            LiveResource {
                logical_id: request.logical_id.clone(),
                kind: request.kind.clone(),
            },
        );
        debug!(
            node = %request.logical_id,
            physical = %physical,
            kind = request.kind.label(),
            "resource applied"
        );
        Ok(Provisioned {
            attributes: attributes_for(&request.kind, &physical),
            physical_id: physical,
        })
    }
}

fn attributes_for(kind: &ResourceKind, physical: &str) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::from([
        (attr::ID.to_string(), physical.to_string()),
        (
            attr::ARN.to_string(),
            format!("arn:tierform:{}:{physical}", kind.label()),
        ),
    ]);
    match kind {
        ResourceKind::Database(db) => {
            attrs.insert(
                attr::ENDPOINT_ADDRESS.to_string(),
                format!("{physical}.db.tierform.local"),
            );
            attrs.insert(attr::ENDPOINT_PORT.to_string(), db.port.to_string());
        }
        ResourceKind::ImageRepository(repo) => {
            attrs.insert(
                attr::REPOSITORY_URI.to_string(),
                format!("{REGISTRY_HOST}/{}", repo.name),
            );
        }
        ResourceKind::LoadBalancer(_) => {
            attrs.insert(
                attr::DNS_NAME.to_string(),
                format!("{physical}.lb.tierform.local"),
            );
        }
        ResourceKind::TaskDefinition(_) => {
            attrs.insert(
                attr::TASK_ROLE.to_string(),
                format!("arn:tierform:role:{physical}-task"),
            );
        }
        ResourceKind::BuildProject(_) => {
            attrs.insert(
                attr::ROLE.to_string(),
                format!("arn:tierform:role:{physical}-build"),
            );
        }
        _ => {}
    }
    attrs
}

impl Provider for InMemoryProvider {
    fn create<'a>(&'a self, request: &'a ProvisionRequest) -> BoxFuture<'a, Provisioned> {
        Box::pin(async move { self.apply(request, None) })
    }

    fn update<'a>(
        &'a self,
        request: &'a ProvisionRequest,
        physical_id: &'a str,
    ) -> BoxFuture<'a, Provisioned> {
        Box::pin(async move { self.apply(request, Some(physical_id)) })
    }

    fn delete<'a>(&'a self, kind: &'a str, physical_id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            let removed = inner.live.remove(physical_id);
            let logical = removed
                .as_ref()
                .map(|r| r.logical_id.clone())
                .unwrap_or_else(|| physical_id.to_string());
            inner.calls.push(ProviderCall::Delete(logical));
            debug!(physical = %physical_id, kind, existed = removed.is_some(), "resource deleted");
            Ok(())
        })
    }

    fn run_task<'a>(&'a self, launch: &'a TaskLaunch) -> BoxFuture<'a, TaskOutcome> {
        Box::pin(async move {
            let (delay, exit_code, fail) = {
                let mut inner = self.lock()?;
                inner
                    .calls
                    .push(ProviderCall::RunTask(launch.execution_id.clone()));
                (
                    inner.task_delay,
                    inner.task_exit_code,
                    inner.fail_on.contains(&launch.execution_id),
                )
            };
            if fail {
                bail!("task launch failed for {}", launch.execution_id);
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(TaskOutcome { exit_code })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierform_graph::resources::{DatabaseProps, RepositoryProps};
    use tierform_core::{SubnetType, Value};

    fn repo_request() -> ProvisionRequest {
        ProvisionRequest {
            environment: "dev".to_string(),
            logical_id: "Repo".to_string(),
            kind: ResourceKind::ImageRepository(RepositoryProps {
                name: "onlineshopping-07".to_string(),
            }),
        }
    }

    #[test]
    fn physical_ids_are_stable_per_environment() {
        assert_eq!(physical_id("dev", "MyVpc"), physical_id("dev", "MyVpc"));
        assert_ne!(physical_id("dev", "MyVpc"), physical_id("prod", "MyVpc"));
        assert!(physical_id("dev", "MyVpc").starts_with("myvpc-"));
    }

    #[tokio::test]
    async fn repository_reports_uri() {
        let provider = InMemoryProvider::new();
        let out = provider.create(&repo_request()).await.unwrap();
        assert_eq!(
            out.attributes[attr::REPOSITORY_URI],
            "registry.tierform.local/onlineshopping-07"
        );
        assert!(provider.is_live("Repo"));
    }

    #[tokio::test]
    async fn database_reports_endpoint_and_port() {
        let provider = InMemoryProvider::new();
        let request = ProvisionRequest {
            environment: "dev".to_string(),
            logical_id: "Db".to_string(),
            kind: ResourceKind::Database(DatabaseProps {
                engine: "mysql".to_string(),
                engine_version: "8.0.42".to_string(),
                instance_class: "t3.small".to_string(),
                allocated_storage_gib: 20,
                database_name: "online_shopping".to_string(),
                username: "rootroot".to_string(),
                password: "rootroot".to_string(),
                port: 3306,
                publicly_accessible: true,
                subnet_type: SubnetType::Public,
                network: Value::literal("vpc-1"),
                security_group: Value::literal("sg-1"),
            }),
        };
        let out = provider.create(&request).await.unwrap();
        assert_eq!(out.attributes[attr::ENDPOINT_PORT], "3306");
        assert!(out.attributes[attr::ENDPOINT_ADDRESS].ends_with(".db.tierform.local"));
    }

    #[tokio::test]
    async fn injected_failure_surfaces() {
        let provider = InMemoryProvider::new();
        provider.fail_on("Repo");
        assert!(provider.create(&repo_request()).await.is_err());
        assert!(!provider.is_live("Repo"));
    }

    #[tokio::test]
    async fn delete_removes_live_resource() {
        let provider = InMemoryProvider::new();
        let out = provider.create(&repo_request()).await.unwrap();
        provider.delete("image_repository", &out.physical_id).await.unwrap();
        assert!(!provider.is_live("Repo"));
        assert_eq!(
            provider.calls(),
            vec![
                ProviderCall::Create("Repo".to_string()),
                ProviderCall::Delete("Repo".to_string())
            ]
        );
    }
}
