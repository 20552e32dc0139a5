//! Resource kinds and their properties.
//!
//! Properties are plain data; anything only known after provisioning is a
//! [`Value::Ref`]. The engine never interprets a kind beyond handing it to
//! the provider, except for the workflow trigger, the bootstrap gate and the
//! service (which it mirrors into the state store).

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use tierform_core::{DeploymentMode, ImageSource, SubnetType, Value};

/// Attribute names providers report and nodes reference.
pub mod attr {
    /// Every provisioned resource exposes its physical id under this name.
    pub const ID: &str = "id";
    pub const ARN: &str = "arn";
    pub const ENDPOINT_ADDRESS: &str = "endpoint_address";
    pub const ENDPOINT_PORT: &str = "endpoint_port";
    pub const REPOSITORY_URI: &str = "repository_uri";
    pub const DNS_NAME: &str = "dns_name";
    pub const TASK_ROLE: &str = "task_role";
    pub const ROLE: &str = "role";
    pub const EXECUTION_ID: &str = "execution_id";
    pub const STATUS: &str = "status";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type", content = "Properties")]
pub enum ResourceKind {
    Network(NetworkProps),
    Cluster(ClusterProps),
    SecurityGroup(SecurityGroupProps),
    Database(DatabaseProps),
    ImageRepository(RepositoryProps),
    TaskDefinition(TaskDefinitionProps),
    StateMachine(StateMachineProps),
    WorkflowTrigger(TriggerProps),
    BootstrapGate(GateProps),
    LoadBalancer(LoadBalancerProps),
    Service(ServiceProps),
    ScalingPolicy(ScalingPolicyProps),
    AccessGrant(GrantProps),
    BuildProject(BuildProjectProps),
    Pipeline(PipelineProps),
}

impl ResourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Network(_) => "network",
            ResourceKind::Cluster(_) => "cluster",
            ResourceKind::SecurityGroup(_) => "security_group",
            ResourceKind::Database(_) => "database",
            ResourceKind::ImageRepository(_) => "image_repository",
            ResourceKind::TaskDefinition(_) => "task_definition",
            ResourceKind::StateMachine(_) => "state_machine",
            ResourceKind::WorkflowTrigger(_) => "workflow_trigger",
            ResourceKind::BootstrapGate(_) => "bootstrap_gate",
            ResourceKind::LoadBalancer(_) => "load_balancer",
            ResourceKind::Service(_) => "service",
            ResourceKind::ScalingPolicy(_) => "scaling_policy",
            ResourceKind::AccessGrant(_) => "access_grant",
            ResourceKind::BuildProject(_) => "build_project",
            ResourceKind::Pipeline(_) => "pipeline",
        }
    }
}

// ── Foundation ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkProps {
    pub cidr: String,
    pub max_azs: u32,
    /// One subnet of each tier per availability zone.
    pub subnet_tiers: Vec<SubnetType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProps {
    pub network: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupProps {
    pub network: Value,
    pub description: String,
    pub allow_all_outbound: bool,
    pub ingress: Vec<IngressRule>,
}

impl SecurityGroupProps {
    /// Whether any ingress rule admits `source` on `port`.
    pub fn admits(&self, source: Ipv4Addr, port: u16) -> bool {
        self.ingress.iter().any(|rule| rule.allows(source, port))
    }
}

/// A TCP ingress rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    /// IPv4 CIDR block (`0.0.0.0/0` for any address).
    pub cidr: String,
    pub port: u16,
    pub description: String,
}

impl IngressRule {
    pub fn any_ipv4(port: u16, description: &str) -> Self {
        Self {
            cidr: "0.0.0.0/0".to_string(),
            port,
            description: description.to_string(),
        }
    }

    pub fn allows(&self, source: Ipv4Addr, port: u16) -> bool {
        port == self.port && cidr_contains(&self.cidr, source)
    }
}

/// `a.b.c.d/n` membership. Malformed blocks admit nothing.
fn cidr_contains(cidr: &str, addr: Ipv4Addr) -> bool {
    let Some((base, bits)) = cidr.split_once('/') else {
        return false;
    };
    let (Ok(base), Ok(bits)) = (base.parse::<Ipv4Addr>(), bits.parse::<u32>()) else {
        return false;
    };
    if bits > 32 {
        return false;
    }
    let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
    (u32::from(base) & mask) == (u32::from(addr) & mask)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseProps {
    pub engine: String,
    pub engine_version: String,
    pub instance_class: String,
    pub allocated_storage_gib: u32,
    pub database_name: String,
    pub username: String,
    pub password: String,
    pub port: u16,
    pub publicly_accessible: bool,
    pub subnet_type: SubnetType,
    pub network: Value,
    pub security_group: Value,
}

// ── Registry ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryProps {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryAccess {
    Pull,
    PullPush,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantProps {
    pub repository: Value,
    pub principal: Value,
    pub access: RepositoryAccess,
}

// ── Tasks and workflows ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum ContainerImage {
    /// Public registry image.
    Registry { uri: String },
    /// Tag in a provisioned repository.
    Repository { repository: Value, tag: String },
    /// Built from a local directory at provisioning time.
    Asset { path: String, platform: String },
}

impl From<&ImageSource> for ContainerImage {
    fn from(source: &ImageSource) -> Self {
        match source {
            ImageSource::Fixed { uri, .. } => ContainerImage::Registry { uri: uri.clone() },
            ImageSource::FromRepository { repository, tag, .. } => ContainerImage::Repository {
                repository: repository.clone(),
                tag: tag.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerDefinition {
    pub name: String,
    pub image: ContainerImage,
    pub port: Option<u16>,
    pub environment: BTreeMap<String, Value>,
    pub log_stream_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinitionProps {
    pub cpu: u32,
    pub memory_mib: u32,
    pub containers: Vec<ContainerDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMachineProps {
    pub cluster: Value,
    pub task_definition: Value,
    pub security_groups: Vec<Value>,
    pub subnet_type: SubnetType,
    pub assign_public_ip: bool,
    /// Seconds before a running execution is forced to `timed-out`.
    pub timeout_secs: u64,
}

/// Create-only control operation: start one execution, keyed by `physical_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerProps {
    pub state_machine: Value,
    pub physical_id: String,
}

/// Resolves once the triggered execution has succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateProps {
    pub execution: Value,
}

// ── Application ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerProps {
    pub network: Value,
    pub public: bool,
    pub listener_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceProps {
    pub cluster: Value,
    pub task_definition: Value,
    pub load_balancer: Value,
    pub mode: DeploymentMode,
    pub desired_count: u32,
    pub container_name: String,
    pub container_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicyProps {
    pub service: Value,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub target_cpu_percent: f64,
    pub scale_in_cooldown_secs: u64,
    pub scale_out_cooldown_secs: u64,
}

// ── Delivery ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildProjectProps {
    pub build_image: String,
    pub privileged: bool,
    pub environment: BTreeMap<String, Value>,
    pub buildspec: BuildSpec,
}

/// Build specification executed by the build stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub version: String,
    pub phases: BuildPhases,
    pub artifacts: BuildArtifacts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildPhases {
    pub pre_build: BuildPhase,
    pub build: BuildPhase,
    pub post_build: BuildPhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildPhase {
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildArtifacts {
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineProps {
    pub name: String,
    pub restart_on_update: bool,
    pub stages: Vec<StageDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    pub action_name: String,
    pub action: StageAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum StageAction {
    GitHubSource {
        owner: String,
        repo: String,
        branch: String,
        token_secret: String,
        output: String,
    },
    Build {
        project: Value,
        input: String,
        output: String,
    },
    ServiceDeploy {
        service: Value,
        input: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_ipv4_rule_admits_every_address_on_its_port() {
        let rule = IngressRule::any_ipv4(3306, "Allow public MySQL access");
        assert!(rule.allows(Ipv4Addr::new(203, 0, 113, 7), 3306));
        assert!(rule.allows(Ipv4Addr::new(10, 1, 2, 3), 3306));
        assert!(!rule.allows(Ipv4Addr::new(203, 0, 113, 7), 5432));
    }

    #[test]
    fn narrow_cidr_limits_sources() {
        let rule = IngressRule {
            cidr: "10.0.0.0/16".to_string(),
            port: 443,
            description: String::new(),
        };
        assert!(rule.allows(Ipv4Addr::new(10, 0, 200, 1), 443));
        assert!(!rule.allows(Ipv4Addr::new(10, 1, 0, 1), 443));
    }

    #[test]
    fn malformed_cidr_admits_nothing() {
        for cidr in ["10.0.0.0", "10.0.0.0/33", "nope/8"] {
            let rule = IngressRule {
                cidr: cidr.to_string(),
                port: 80,
                description: String::new(),
            };
            assert!(!rule.allows(Ipv4Addr::new(10, 0, 0, 1), 80), "{cidr}");
        }
    }

    #[test]
    fn kind_serializes_with_type_and_properties() {
        let kind = ResourceKind::ImageRepository(RepositoryProps {
            name: "onlineshopping-07".to_string(),
        });
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["Type"], "ImageRepository");
        assert_eq!(json["Properties"]["name"], "onlineshopping-07");
    }
}
