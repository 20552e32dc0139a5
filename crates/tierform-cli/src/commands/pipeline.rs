use std::sync::Arc;

use anyhow::Context;
use tierform_graph::attr;
use tierform_graph::registry::REPOSITORY;
use tierform_graph::service::SERVICE;
use tierform_pipeline::{LocalDeployer, LocalRegistry, PipelineController, PipelineSettings, PipelineTarget, StaticSecrets, StaticSource};

use super::Workspace;

/// Environment variable read as the source host token.
pub const SOURCE_TOKEN_VAR: &str = "TIERFORM_SOURCE_TOKEN";

pub async fn run(workspace: &Workspace, revision: &str) -> anyhow::Result<()> {
    let store = workspace.store()?;
    let env = workspace.environment();
    let config = &workspace.config;

    let repository_uri = store
        .get_resource(env, REPOSITORY)?
        .and_then(|r| r.attributes.get(attr::REPOSITORY_URI).cloned())
        .with_context(|| format!("repository not provisioned in '{env}'; run `tierform deploy` first"))?;

    let target = PipelineTarget {
        environment: env.to_string(),
        service: SERVICE.to_string(),
        container: config.service.container_name.clone(),
        repository_uri,
    };
    let settings = PipelineSettings::from_config(&config.pipeline, target);

    let source = Arc::new(StaticSource::new());
    source.push(&config.pipeline.owner, &config.pipeline.repo, &config.pipeline.branch, revision);
    let mut secrets = StaticSecrets::new();
    if let Ok(token) = std::env::var(SOURCE_TOKEN_VAR) {
        secrets = secrets.with(&config.pipeline.token_secret, &token);
    }

    let controller = PipelineController::new(
        store,
        settings,
        source,
        Arc::new(secrets),
        Arc::new(LocalRegistry::new()),
        Arc::new(LocalDeployer::new()),
    );
    let record = controller.run().await?;
    println!(
        "Pipeline {} #{} succeeded: {}:{}",
        record.pipeline,
        record.sequence,
        controller.settings().target.repository_uri,
        record.image_tag.as_deref().unwrap_or("latest")
    );
    Ok(())
}
