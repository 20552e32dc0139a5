//! The three pipeline stages and the artifact each hands to the next.

use std::collections::BTreeMap;

use tierform_core::{ImageDefinitions, ImageUri, IMAGE_DEFINITIONS_FILE};
use tierform_state::{ServiceRecord, StateStore};
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::toolchain::{
    ContainerToolchain, SecretStore, ServiceDeployer, SourceArtifact, SourceHost, SourceRequest,
};

/// Length of the image tag taken from the commit id.
pub const TAG_LENGTH: usize = 7;

/// Image tag for a source revision: its first seven characters.
pub fn image_tag_for_revision(revision: &str) -> PipelineResult<String> {
    let revision = revision.trim();
    if revision.is_empty() || !revision.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(PipelineError::InvalidRevision(revision.to_string()));
    }
    Ok(revision.chars().take(TAG_LENGTH).collect())
}

/// Where the source lives and which secret holds its access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub token_secret: String,
}

/// Files produced by the build stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildArtifact {
    pub image_tag: String,
    pub files: BTreeMap<String, String>,
}

impl BuildArtifact {
    /// The parsed image definitions file.
    pub fn image_definitions(&self) -> PipelineResult<ImageDefinitions> {
        let raw = self
            .files
            .get(IMAGE_DEFINITIONS_FILE)
            .ok_or_else(|| PipelineError::Artifact(format!("missing {IMAGE_DEFINITIONS_FILE}")))?;
        let defs = ImageDefinitions::from_json(raw)
            .map_err(|e| PipelineError::Artifact(format!("{IMAGE_DEFINITIONS_FILE}: {e}")))?;
        if defs.is_empty() {
            return Err(PipelineError::Artifact(format!("{IMAGE_DEFINITIONS_FILE} is empty")));
        }
        Ok(defs)
    }
}

pub async fn source_stage(
    host: &dyn SourceHost,
    secrets: &dyn SecretStore,
    settings: &SourceSettings,
) -> PipelineResult<SourceArtifact> {
    let token = secrets
        .secret(&settings.token_secret)
        .map_err(|e| PipelineError::Source(format!("{e:#}")))?;
    let request = SourceRequest {
        owner: settings.owner.clone(),
        repo: settings.repo.clone(),
        branch: settings.branch.clone(),
        token,
    };
    let artifact = host
        .fetch(&request)
        .await
        .map_err(|e| PipelineError::Source(format!("{e:#}")))?;
    info!(
        repo = %format!("{}/{}", settings.owner, settings.repo),
        branch = %settings.branch,
        revision = %artifact.revision,
        "source fetched"
    );
    Ok(artifact)
}

/// Build, tag and push `{repository}:{short revision}` and
/// `{repository}:latest`, then write the image definitions for `container`.
///
/// Nothing is returned on failure, so a failed build never reaches deploy.
pub async fn build_stage(
    toolchain: &dyn ContainerToolchain,
    source: &SourceArtifact,
    repository_uri: &str,
    container: &str,
) -> PipelineResult<BuildArtifact> {
    let repository = ImageUri::parse(repository_uri)
        .map_err(|e| PipelineError::Build(e.to_string()))?
        .repository_uri();
    let tag = image_tag_for_revision(&source.revision)?;
    let versioned = format!("{repository}:{tag}");
    let latest = format!("{repository}:latest");
    let build_err = |e: anyhow::Error| PipelineError::Build(format!("{e:#}"));

    if let Some(registry) = repository.split_once('/').map(|(host, _)| host) {
        toolchain.login(registry).await.map_err(build_err)?;
    }
    toolchain.build(source, &versioned).await.map_err(build_err)?;
    toolchain.tag(&versioned, &latest).await.map_err(build_err)?;
    toolchain.push(&versioned).await.map_err(build_err)?;
    toolchain.push(&latest).await.map_err(build_err)?;

    let definitions = ImageDefinitions::single(container, &latest)
        .to_json()
        .map_err(|e| PipelineError::Artifact(e.to_string()))?;
    info!(image = %versioned, "image pushed");
    Ok(BuildArtifact {
        image_tag: tag,
        files: BTreeMap::from([(IMAGE_DEFINITIONS_FILE.to_string(), definitions)]),
    })
}

/// Point the named containers of the provisioned service at their new
/// images. Containers absent from the artifact keep their image.
///
/// The rollout goes to `deployer` first; the service record only changes
/// once the runtime has accepted it.
pub async fn deploy_stage(
    store: &StateStore,
    deployer: &dyn ServiceDeployer,
    environment: &str,
    service: &str,
    artifact: &BuildArtifact,
) -> PipelineResult<ServiceRecord> {
    let definitions = artifact.image_definitions()?;
    let mut record = store
        .get_service(environment, service)?
        .ok_or_else(|| PipelineError::ServiceNotFound {
            environment: environment.to_string(),
            service: service.to_string(),
        })?;

    for def in definitions.iter() {
        let container = record
            .containers
            .iter_mut()
            .find(|c| c.name == def.name)
            .ok_or_else(|| PipelineError::ContainerNotFound {
                service: service.to_string(),
                container: def.name.clone(),
            })?;
        debug!(container = %def.name, from = %container.image, to = %def.image_uri, "container image updated");
        container.image = def.image_uri.clone();
    }
    record.revision += 1;
    record.updated_at = crate::controller::epoch_secs();
    deployer
        .deploy(&record)
        .await
        .map_err(|e| PipelineError::Deploy(format!("{e:#}")))?;
    store.put_service(&record)?;
    info!(service = %service, revision = record.revision, "service deployed");
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::{LocalDeployer, LocalRegistry, StaticSecrets, StaticSource};
    use tierform_state::ContainerRecord;

    const REPO: &str = "registry.tierform.local/onlineshopping-07";

    fn service() -> ServiceRecord {
        ServiceRecord {
            environment: "dev".to_string(),
            name: "MyFargateService".to_string(),
            physical_id: "svc-1".to_string(),
            cluster: "cluster-1".to_string(),
            containers: vec![
                ContainerRecord {
                    name: "onlineshopping".to_string(),
                    image: "amazon/amazon-ecs-sample".to_string(),
                    port: Some(8070),
                },
                ContainerRecord {
                    name: "sidecar".to_string(),
                    image: "envoy:1.30".to_string(),
                    port: None,
                },
            ],
            desired_count: 3,
            min_capacity: 3,
            max_capacity: 6,
            revision: 1,
            updated_at: 1000,
        }
    }

    fn source(revision: &str) -> SourceArtifact {
        SourceArtifact {
            revision: revision.to_string(),
            location: "QiuzhiLyon/OnlineShopping_07@main".to_string(),
        }
    }

    #[test]
    fn tag_is_first_seven_characters() {
        assert_eq!(image_tag_for_revision("abcdef1234567").unwrap(), "abcdef1");
        assert_eq!(image_tag_for_revision("abc").unwrap(), "abc");
        assert!(image_tag_for_revision("").is_err());
        assert!(image_tag_for_revision("abc; rm -rf").is_err());
    }

    #[tokio::test]
    async fn source_needs_stored_token() {
        let host = StaticSource::new();
        host.push("QiuzhiLyon", "OnlineShopping_07", "main", "abcdef1234567");
        let settings = SourceSettings {
            owner: "QiuzhiLyon".to_string(),
            repo: "OnlineShopping_07".to_string(),
            branch: "main".to_string(),
            token_secret: "github-token".to_string(),
        };

        let err = source_stage(&host, &StaticSecrets::new(), &settings).await.unwrap_err();
        assert!(matches!(err, PipelineError::Source(_)));

        let secrets = StaticSecrets::new().with("github-token", "t0k3n");
        let artifact = source_stage(&host, &secrets, &settings).await.unwrap();
        assert_eq!(artifact.revision, "abcdef1234567");
    }

    #[tokio::test]
    async fn build_pushes_revision_and_latest() {
        let registry = LocalRegistry::new();
        let artifact = build_stage(&registry, &source("abcdef1234567"), REPO, "onlineshopping")
            .await
            .unwrap();

        assert_eq!(artifact.image_tag, "abcdef1");
        assert_eq!(registry.tags(REPO), vec!["abcdef1", "latest"]);
        assert_eq!(
            artifact.files[IMAGE_DEFINITIONS_FILE],
            format!(r#"[{{"name":"onlineshopping","imageUri":"{REPO}:latest"}}]"#)
        );
    }

    #[tokio::test]
    async fn failed_build_emits_nothing() {
        let registry = LocalRegistry::new();
        registry.fail_builds(true);
        let err = build_stage(&registry, &source("abcdef1234567"), REPO, "onlineshopping")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Build(_)));
        assert!(registry.tags(REPO).is_empty());
    }

    fn latest_artifact() -> BuildArtifact {
        BuildArtifact {
            image_tag: "abcdef1".to_string(),
            files: BTreeMap::from([(
                IMAGE_DEFINITIONS_FILE.to_string(),
                format!(r#"[{{"name":"onlineshopping","imageUri":"{REPO}:latest"}}]"#),
            )]),
        }
    }

    #[tokio::test]
    async fn deploy_updates_only_named_container() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_service(&service()).unwrap();
        let artifact = BuildArtifact {
            image_tag: "abcdef1".to_string(),
            files: BTreeMap::from([(
                IMAGE_DEFINITIONS_FILE.to_string(),
                format!(r#"[{{"name":"onlineshopping","imageUri":"{REPO}:latest"}}]"#),
            )]),
        };

        let deployer = LocalDeployer::new();
        let updated = deploy_stage(&store, &deployer, "dev", "MyFargateService", &artifact)
            .await
            .unwrap();
        assert_eq!(updated.container("onlineshopping").unwrap().image, format!("{REPO}:latest"));
        assert_eq!(updated.container("sidecar").unwrap().image, "envoy:1.30");
        assert_eq!(updated.revision, 2);
        assert_eq!(deployer.deployed(), vec![updated]);
    }

    #[tokio::test]
    async fn rejected_rollout_leaves_record_unchanged() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_service(&service()).unwrap();
        let deployer = LocalDeployer::new();
        deployer.fail_deploys(true);

        let err = deploy_stage(&store, &deployer, "dev", "MyFargateService", &latest_artifact())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Deploy(_)));
        assert!(deployer.deployed().is_empty());
        assert_eq!(store.get_service("dev", "MyFargateService").unwrap().unwrap(), service());
    }

    #[tokio::test]
    async fn deploy_fails_without_service() {
        let store = StateStore::open_in_memory().unwrap();
        let artifact = BuildArtifact {
            image_tag: "abcdef1".to_string(),
            files: BTreeMap::from([(
                IMAGE_DEFINITIONS_FILE.to_string(),
                r#"[{"name":"onlineshopping","imageUri":"x:latest"}]"#.to_string(),
            )]),
        };
        let err = deploy_stage(&store, &LocalDeployer::new(), "dev", "MyFargateService", &artifact)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ServiceNotFound { .. }));
    }

    #[tokio::test]
    async fn deploy_fails_for_unknown_container() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_service(&service()).unwrap();
        let artifact = BuildArtifact {
            image_tag: "abcdef1".to_string(),
            files: BTreeMap::from([(
                IMAGE_DEFINITIONS_FILE.to_string(),
                r#"[{"name":"web","imageUri":"x:latest"}]"#.to_string(),
            )]),
        };
        let err = deploy_stage(&store, &LocalDeployer::new(), "dev", "MyFargateService", &artifact)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ContainerNotFound { .. }));
        let unchanged = store.get_service("dev", "MyFargateService").unwrap().unwrap();
        assert_eq!(unchanged.revision, 1);
    }

    #[tokio::test]
    async fn missing_artifact_file_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_service(&service()).unwrap();
        let err = deploy_stage(&store, &LocalDeployer::new(), "dev", "MyFargateService", &BuildArtifact::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Artifact(_)));
    }
}
