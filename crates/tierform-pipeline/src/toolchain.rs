//! External collaborators of the pipeline: source hosting, secret storage,
//! the container build toolchain and the service runtime that rolls out a
//! new image. Each is a trait so the stages can run against real services
//! or the local stand-ins below.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use tierform_state::ServiceRecord;
use tracing::debug;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Which branch to fetch and with which stored token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRequest {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub token: String,
}

/// The fetched source tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceArtifact {
    /// Resolved commit id.
    pub revision: String,
    pub location: String,
}

pub trait SourceHost: Send + Sync {
    fn fetch<'a>(&'a self, request: &'a SourceRequest) -> BoxFuture<'a, SourceArtifact>;
}

pub trait SecretStore: Send + Sync {
    fn secret(&self, name: &str) -> anyhow::Result<String>;
}

pub trait ContainerToolchain: Send + Sync {
    fn login<'a>(&'a self, registry: &'a str) -> BoxFuture<'a, ()>;
    fn build<'a>(&'a self, source: &'a SourceArtifact, image: &'a str) -> BoxFuture<'a, ()>;
    fn tag<'a>(&'a self, image: &'a str, target: &'a str) -> BoxFuture<'a, ()>;
    fn push<'a>(&'a self, image: &'a str) -> BoxFuture<'a, ()>;
}

/// Rolls the running service over to the containers in `service`.
pub trait ServiceDeployer: Send + Sync {
    fn deploy<'a>(&'a self, service: &'a ServiceRecord) -> BoxFuture<'a, ()>;
}

// ── Local stand-ins ───────────────────────────────────────────────

/// Secrets held in memory.
#[derive(Debug, Default)]
pub struct StaticSecrets {
    values: BTreeMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }
}

impl SecretStore for StaticSecrets {
    fn secret(&self, name: &str) -> anyhow::Result<String> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("secret '{name}' not found"))
    }
}

/// A source host whose branch head is set by the caller.
#[derive(Debug, Default)]
pub struct StaticSource {
    heads: Mutex<BTreeMap<String, String>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `owner/repo@branch` to `revision`.
    pub fn push(&self, owner: &str, repo: &str, branch: &str, revision: &str) {
        if let Ok(mut heads) = self.heads.lock() {
            heads.insert(format!("{owner}/{repo}@{branch}"), revision.to_string());
        }
    }
}

impl SourceHost for StaticSource {
    fn fetch<'a>(&'a self, request: &'a SourceRequest) -> BoxFuture<'a, SourceArtifact> {
        Box::pin(async move {
            if request.token.is_empty() {
                bail!("no access token for {}/{}", request.owner, request.repo);
            }
            let key = format!("{}/{}@{}", request.owner, request.repo, request.branch);
            let revision = self
                .heads
                .lock()
                .map_err(|_| anyhow!("source state poisoned"))?
                .get(&key)
                .cloned()
                .ok_or_else(|| anyhow!("branch {key} not found"))?;
            Ok(SourceArtifact {
                revision,
                location: key,
            })
        })
    }
}

/// A registry plus builder kept in memory: built images become pushable,
/// pushed images become visible in [`LocalRegistry::tags`].
#[derive(Debug, Default)]
pub struct LocalRegistry {
    inner: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    logged_in: BTreeSet<String>,
    built: BTreeSet<String>,
    pushed: BTreeMap<String, BTreeSet<String>>,
    fail_builds: bool,
    build_delay: Duration,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_builds(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_builds = fail;
        }
    }

    pub fn set_build_delay(&self, delay: Duration) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.build_delay = delay;
        }
    }

    /// Tags pushed for a repository URI.
    pub fn tags(&self, repository_uri: &str) -> Vec<String> {
        self.inner
            .lock()
            .ok()
            .and_then(|i| i.pushed.get(repository_uri).cloned())
            .map(|tags| tags.into_iter().collect())
            .unwrap_or_default()
    }
}

fn split_image(image: &str) -> anyhow::Result<(String, String)> {
    let uri = tierform_core::ImageUri::parse(image)?;
    Ok((uri.repository_uri(), uri.tag_or_latest().to_string()))
}

impl ContainerToolchain for LocalRegistry {
    fn login<'a>(&'a self, registry: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.inner
                .lock()
                .map_err(|_| anyhow!("registry state poisoned"))?
                .logged_in
                .insert(registry.to_string());
            debug!(registry, "registry login");
            Ok(())
        })
    }

    fn build<'a>(&'a self, source: &'a SourceArtifact, image: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let (fail, delay) = {
                let inner = self.inner.lock().map_err(|_| anyhow!("registry state poisoned"))?;
                (inner.fail_builds, inner.build_delay)
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if fail {
                bail!("build of {} at {} failed", image, source.revision);
            }
            self.inner
                .lock()
                .map_err(|_| anyhow!("registry state poisoned"))?
                .built
                .insert(image.to_string());
            debug!(image, revision = %source.revision, "image built");
            Ok(())
        })
    }

    fn tag<'a>(&'a self, image: &'a str, target: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().map_err(|_| anyhow!("registry state poisoned"))?;
            if !inner.built.contains(image) {
                bail!("no local image {image}");
            }
            inner.built.insert(target.to_string());
            Ok(())
        })
    }

    fn push<'a>(&'a self, image: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let (repository, tag) = split_image(image)?;
            let mut inner = self.inner.lock().map_err(|_| anyhow!("registry state poisoned"))?;
            if !inner.built.contains(image) {
                bail!("no local image {image}");
            }
            let host = repository.split('/').next().unwrap_or_default().to_string();
            if !inner.logged_in.contains(&host) {
                bail!("not logged in to {host}");
            }
            inner.pushed.entry(repository).or_default().insert(tag);
            debug!(image, "image pushed");
            Ok(())
        })
    }
}

/// A service runtime kept in memory: remembers every rollout it accepted.
#[derive(Debug, Default)]
pub struct LocalDeployer {
    inner: Mutex<DeployerState>,
}

#[derive(Debug, Default)]
struct DeployerState {
    deployed: Vec<ServiceRecord>,
    fail: bool,
}

impl LocalDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deploys(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail = fail;
        }
    }

    /// Accepted rollouts, oldest first.
    pub fn deployed(&self) -> Vec<ServiceRecord> {
        self.inner
            .lock()
            .map(|i| i.deployed.clone())
            .unwrap_or_default()
    }
}

impl ServiceDeployer for LocalDeployer {
    fn deploy<'a>(&'a self, service: &'a ServiceRecord) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().map_err(|_| anyhow!("deployer state poisoned"))?;
            if inner.fail {
                bail!("rollout of {} revision {} rejected", service.name, service.revision);
            }
            inner.deployed.push(service.clone());
            debug!(service = %service.name, revision = service.revision, "rollout accepted");
            Ok(())
        })
    }
}
