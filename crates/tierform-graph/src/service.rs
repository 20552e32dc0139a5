//! Application service provisioner.
//!
//! Resolves the conditional image source, stands up the load-balanced
//! service behind the bootstrap ready signal, attaches CPU target tracking
//! and grants the task identity pull access on the repository.

use std::collections::BTreeMap;

use tierform_core::config::parse_duration;
use tierform_core::{DeploymentMode, ImageSource, TaskSizing, TierformConfig, Value};

use crate::bootstrap::Bootstrap;
use crate::error::GraphResult;
use crate::foundation::Foundation;
use crate::graph::GraphBuilder;
use crate::node::{ResourceNode, StackName};
use crate::registry::{grant, Repository};
use crate::resources::{
    attr, ContainerDefinition, ContainerImage, LoadBalancerProps, RepositoryAccess, ResourceKind,
    ScalingPolicyProps, ServiceProps, TaskDefinitionProps,
};

pub const SERVICE: &str = "MyFargateService";
pub const SERVICE_TASK_DEFINITION: &str = "MyFargateServiceTaskDef";
pub const LOAD_BALANCER: &str = "MyFargateServiceLB";
pub const SCALING_POLICY: &str = "MyFargateServiceCpuScaling";
pub const PULL_GRANT: &str = "MyFargateServicePullGrant";

/// Everything the deployment mode decides, chosen together.
#[derive(Debug, Clone, PartialEq)]
pub struct AppProfile {
    pub mode: DeploymentMode,
    pub image: ImageSource,
    pub sizing: TaskSizing,
}

impl AppProfile {
    /// Evaluate the mode once and derive image, port and sizing from it.
    pub fn select(mode: DeploymentMode, config: &TierformConfig, repository: &Repository) -> Self {
        let service = &config.service;
        match mode {
            DeploymentMode::Bootstrap => AppProfile {
                mode,
                image: ImageSource::Fixed {
                    uri: service.placeholder_image.clone(),
                    port: service.placeholder_port,
                },
                sizing: TaskSizing::FIXED,
            },
            DeploymentMode::Pipeline => AppProfile {
                mode,
                image: ImageSource::FromRepository {
                    repository: repository.uri.clone(),
                    tag: "latest".to_string(),
                    port: service.app_port,
                },
                sizing: service.pipeline_sizing(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppService {
    pub service: String,
    pub task_definition: String,
    pub load_balancer: String,
    pub container_name: String,
    pub profile: AppProfile,
}

pub fn add_service(
    graph: &mut GraphBuilder,
    config: &TierformConfig,
    profile: AppProfile,
    foundation: &Foundation,
    bootstrap: &Bootstrap,
    repository: &Repository,
) -> GraphResult<AppService> {
    let stack = StackName::Application;
    let service_cfg = &config.service;
    let port = profile.image.port();

    graph.add(ResourceNode::new(
        SERVICE_TASK_DEFINITION,
        stack,
        ResourceKind::TaskDefinition(TaskDefinitionProps {
            cpu: profile.sizing.cpu,
            memory_mib: profile.sizing.memory_mib,
            containers: vec![ContainerDefinition {
                name: service_cfg.container_name.clone(),
                image: ContainerImage::from(&profile.image),
                port: Some(port),
                environment: BTreeMap::from([(
                    "DB_HOST".to_string(),
                    foundation.database_endpoint.clone(),
                )]),
                log_stream_prefix: None,
            }],
        }),
    ))?;

    graph.add(ResourceNode::new(
        LOAD_BALANCER,
        stack,
        ResourceKind::LoadBalancer(LoadBalancerProps {
            network: Value::attr(&foundation.network, attr::ID),
            public: service_cfg.public_load_balancer,
            listener_port: 80,
        }),
    ))?;

    graph.add(
        ResourceNode::new(
            SERVICE,
            stack,
            ResourceKind::Service(ServiceProps {
                cluster: Value::attr(&foundation.cluster, attr::ID),
                task_definition: Value::attr(SERVICE_TASK_DEFINITION, attr::ARN),
                load_balancer: Value::attr(LOAD_BALANCER, attr::ID),
                mode: profile.mode,
                desired_count: service_cfg.desired_count,
                container_name: service_cfg.container_name.clone(),
                container_port: port,
            }),
        )
        .depends_on(bootstrap.ready_signal()),
    )?;

    let scaling = &service_cfg.scaling;
    graph.add(ResourceNode::new(
        SCALING_POLICY,
        stack,
        ResourceKind::ScalingPolicy(ScalingPolicyProps {
            service: Value::attr(SERVICE, attr::ID),
            min_capacity: scaling.min_capacity,
            max_capacity: scaling.max_capacity,
            target_cpu_percent: scaling.target_cpu_percent,
            scale_in_cooldown_secs: parse_duration(&scaling.scale_in_cooldown)?.as_secs(),
            scale_out_cooldown_secs: parse_duration(&scaling.scale_out_cooldown)?.as_secs(),
        }),
    ))?;

    grant(
        graph,
        PULL_GRANT,
        stack,
        repository,
        Value::attr(SERVICE_TASK_DEFINITION, attr::TASK_ROLE),
        RepositoryAccess::Pull,
    )?;

    Ok(AppService {
        service: SERVICE.to_string(),
        task_definition: SERVICE_TASK_DEFINITION.to_string(),
        load_balancer: LOAD_BALANCER.to_string(),
        container_name: service_cfg.container_name.clone(),
        profile,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::REPOSITORY;

    fn repository() -> Repository {
        Repository {
            id: REPOSITORY.to_string(),
            uri: Value::attr(REPOSITORY, attr::REPOSITORY_URI),
        }
    }

    #[test]
    fn bootstrap_profile_is_placeholder_on_port_80() {
        let config = TierformConfig::default();
        let profile = AppProfile::select(DeploymentMode::Bootstrap, &config, &repository());
        assert_eq!(
            profile.image,
            ImageSource::Fixed {
                uri: "amazon/amazon-ecs-sample".to_string(),
                port: 80
            }
        );
        assert_eq!(profile.sizing, TaskSizing::FIXED);
    }

    #[test]
    fn pipeline_profile_is_repository_latest_on_app_port() {
        let mut config = TierformConfig::default();
        config.service.cpu = 1024;
        config.service.memory_mib = 2048;
        let profile = AppProfile::select(DeploymentMode::Pipeline, &config, &repository());
        assert_eq!(
            profile.image,
            ImageSource::FromRepository {
                repository: Value::attr(REPOSITORY, attr::REPOSITORY_URI),
                tag: "latest".to_string(),
                port: 8070
            }
        );
        assert_eq!(profile.sizing.cpu, 1024);
    }

    #[test]
    fn bootstrap_sizing_ignores_configured_sizing() {
        let mut config = TierformConfig::default();
        config.service.cpu = 4096;
        let profile = AppProfile::select(DeploymentMode::Bootstrap, &config, &repository());
        assert_eq!(profile.sizing.cpu, 256);
    }
}
