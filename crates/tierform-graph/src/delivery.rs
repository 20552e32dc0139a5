//! Delivery pipeline orchestrator: build project and the three-stage pipeline.

use std::collections::BTreeMap;

use tierform_core::{TierformConfig, Value, IMAGE_DEFINITIONS_FILE};

use crate::error::GraphResult;
use crate::graph::GraphBuilder;
use crate::node::{ResourceNode, StackName};
use crate::registry::{grant, Repository};
use crate::resources::{
    attr, BuildArtifacts, BuildPhase, BuildPhases, BuildProjectProps, BuildSpec, PipelineProps,
    RepositoryAccess, ResourceKind, StageAction, StageDefinition,
};
use crate::service::AppService;

pub const BUILD_PROJECT: &str = "MyAppBuildProject";
pub const PIPELINE: &str = "MyEcsPipeline";
pub const PUSH_GRANT: &str = "MyAppBuildProjectPullPushGrant";

/// Environment variable carrying the repository URI into the build.
pub const REPOSITORY_URI_VAR: &str = "REPOSITORY_URI";

pub const SOURCE_ARTIFACT: &str = "SourceOutput";
pub const BUILD_ARTIFACT: &str = "BuildOutput";

#[derive(Debug, Clone)]
pub struct Delivery {
    pub build_project: String,
    pub pipeline: String,
}

/// Build instructions: log in, tag by short commit id, push revision and
/// `latest`, then write the image definitions artifact for `container`.
pub fn buildspec(container: &str) -> BuildSpec {
    let uri = format!("${REPOSITORY_URI_VAR}");
    BuildSpec {
        version: "0.2".to_string(),
        phases: BuildPhases {
            pre_build: BuildPhase {
                commands: vec![
                    "echo Logging in to the image registry...".to_string(),
                    format!(
                        "aws ecr get-login-password --region $AWS_DEFAULT_REGION | docker login --username AWS --password-stdin ${{{REPOSITORY_URI_VAR}%%/*}}"
                    ),
                    "COMMIT_HASH=$(echo $CODEBUILD_RESOLVED_SOURCE_VERSION | cut -c 1-7)".to_string(),
                    "IMAGE_TAG=${COMMIT_HASH}".to_string(),
                ],
            },
            build: BuildPhase {
                commands: vec![
                    "echo Building the Docker image...".to_string(),
                    format!("docker build -t {uri}:$IMAGE_TAG ."),
                    format!("docker tag {uri}:$IMAGE_TAG {uri}:latest"),
                    format!("docker push {uri}:$IMAGE_TAG"),
                    format!("docker push {uri}:latest"),
                ],
            },
            post_build: BuildPhase {
                commands: vec![
                    format!("echo Writing {IMAGE_DEFINITIONS_FILE} file..."),
                    format!(
                        "printf '[{{\"name\":\"{container}\",\"imageUri\":\"%s\"}}]' {uri}:latest > {IMAGE_DEFINITIONS_FILE}"
                    ),
                ],
            },
        },
        artifacts: BuildArtifacts {
            files: vec![IMAGE_DEFINITIONS_FILE.to_string()],
        },
    }
}

pub fn add_delivery(
    graph: &mut GraphBuilder,
    config: &TierformConfig,
    repository: &Repository,
    app: &AppService,
) -> GraphResult<Delivery> {
    let stack = StackName::Delivery;
    let pipeline = &config.pipeline;

    graph.add(ResourceNode::new(
        BUILD_PROJECT,
        stack,
        ResourceKind::BuildProject(BuildProjectProps {
            build_image: pipeline.build_image.clone(),
            privileged: pipeline.privileged,
            environment: BTreeMap::from([(
                REPOSITORY_URI_VAR.to_string(),
                repository.uri.clone(),
            )]),
            buildspec: buildspec(&app.container_name),
        }),
    ))?;

    grant(
        graph,
        PUSH_GRANT,
        stack,
        repository,
        Value::attr(BUILD_PROJECT, attr::ROLE),
        RepositoryAccess::PullPush,
    )?;

    graph.add(ResourceNode::new(
        PIPELINE,
        stack,
        ResourceKind::Pipeline(PipelineProps {
            name: pipeline.name.clone(),
            restart_on_update: pipeline.restart_on_update,
            stages: vec![
                StageDefinition {
                    name: "Source".to_string(),
                    action_name: "GitHub_Source".to_string(),
                    action: StageAction::GitHubSource {
                        owner: pipeline.owner.clone(),
                        repo: pipeline.repo.clone(),
                        branch: pipeline.branch.clone(),
                        token_secret: pipeline.token_secret.clone(),
                        output: SOURCE_ARTIFACT.to_string(),
                    },
                },
                StageDefinition {
                    name: "Build".to_string(),
                    action_name: "Docker_Build".to_string(),
                    action: StageAction::Build {
                        project: Value::attr(BUILD_PROJECT, attr::ARN),
                        input: SOURCE_ARTIFACT.to_string(),
                        output: BUILD_ARTIFACT.to_string(),
                    },
                },
                StageDefinition {
                    name: "Deploy".to_string(),
                    action_name: "Deploy_to_ECS".to_string(),
                    action: StageAction::ServiceDeploy {
                        service: Value::attr(&app.service, attr::ID),
                        input: BUILD_ARTIFACT.to_string(),
                    },
                },
            ],
        }),
    ))?;

    Ok(Delivery {
        build_project: BUILD_PROJECT.to_string(),
        pipeline: PIPELINE.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buildspec_tags_by_short_commit_and_latest() {
        let spec = buildspec("onlineshopping");
        assert_eq!(spec.version, "0.2");
        assert!(spec
            .phases
            .pre_build
            .commands
            .iter()
            .any(|c| c.contains("cut -c 1-7")));
        let build = &spec.phases.build.commands;
        assert!(build.contains(&"docker push $REPOSITORY_URI:$IMAGE_TAG".to_string()));
        assert!(build.contains(&"docker push $REPOSITORY_URI:latest".to_string()));
    }

    #[test]
    fn buildspec_writes_image_definitions_for_container() {
        let spec = buildspec("onlineshopping");
        let last = spec.phases.post_build.commands.last().unwrap();
        assert_eq!(
            last,
            r#"printf '[{"name":"onlineshopping","imageUri":"%s"}]' $REPOSITORY_URI:latest > imagedefinitions.json"#
        );
        assert_eq!(spec.artifacts.files, vec!["imagedefinitions.json"]);
    }

    #[test]
    fn login_uses_registry_host() {
        let spec = buildspec("app");
        assert!(spec.phases.pre_build.commands[1].ends_with("${REPOSITORY_URI%%/*}"));
    }
}
