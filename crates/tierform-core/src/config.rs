//! tierform.toml configuration parser.
//!
//! Every section defaults to the reference topology, so an empty file (or no
//! file at all) describes the standard deployment.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::DeployContext;
use crate::types::TaskSizing;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TierformConfig {
    pub environment: EnvironmentConfig,
    pub network: NetworkConfig,
    pub database: DatabaseConfig,
    pub bootstrap: BootstrapConfig,
    pub service: ServiceConfig,
    pub registry: RegistryConfig,
    pub pipeline: PipelineConfig,
    pub context: DeployContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub name: String,
    pub region: String,
    pub account: String,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            name: "dev".to_string(),
            region: "us-east-1".to_string(),
            account: "000000000000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub max_azs: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { max_azs: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub engine: String,
    pub engine_version: String,
    pub instance_class: String,
    pub allocated_storage_gib: u32,
    pub database_name: String,
    pub username: String,
    pub password: String,
    pub port: u16,
    pub publicly_accessible: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: "mysql".to_string(),
            engine_version: "8.0.42".to_string(),
            instance_class: "t3.small".to_string(),
            allocated_storage_gib: 20,
            database_name: "online_shopping".to_string(),
            username: "rootroot".to_string(),
            password: "rootroot".to_string(),
            port: 3306,
            publicly_accessible: true,
        }
    }
}

/// What the application service waits for before it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// Wait until the bootstrap workflow has been started.
    Trigger,
    /// Wait until the bootstrap workflow has succeeded.
    #[default]
    Completion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub cpu: u32,
    pub memory_mib: u32,
    /// Directory holding the init job's container build context.
    pub image_asset: String,
    pub platform: String,
    pub log_stream_prefix: String,
    pub timeout: String,
    pub gate: GateMode,
    /// Fixed physical id that makes the workflow trigger idempotent.
    pub execution_id: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            cpu: 256,
            memory_mib: 512,
            image_asset: "init_task".to_string(),
            platform: "linux/amd64".to_string(),
            log_stream_prefix: "InitTask".to_string(),
            timeout: "5m".to_string(),
            gate: GateMode::Completion,
            execution_id: "InitTaskExecution".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub container_name: String,
    pub placeholder_image: String,
    pub placeholder_port: u16,
    pub app_port: u16,
    /// Pipeline-mode sizing. Bootstrap mode always uses [`TaskSizing::FIXED`].
    pub cpu: u32,
    pub memory_mib: u32,
    pub desired_count: u32,
    pub public_load_balancer: bool,
    pub scaling: ScalingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            container_name: "onlineshopping".to_string(),
            placeholder_image: "amazon/amazon-ecs-sample".to_string(),
            placeholder_port: 80,
            app_port: 8070,
            cpu: 256,
            memory_mib: 512,
            desired_count: 3,
            public_load_balancer: true,
            scaling: ScalingConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn pipeline_sizing(&self) -> TaskSizing {
        TaskSizing {
            cpu: self.cpu,
            memory_mib: self.memory_mib,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub target_cpu_percent: f64,
    pub scale_in_cooldown: String,
    pub scale_out_cooldown: String,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_capacity: 3,
            max_capacity: 6,
            target_cpu_percent: 60.0,
            scale_in_cooldown: "60s".to_string(),
            scale_out_cooldown: "60s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub repository_name: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            repository_name: "onlineshopping-07".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub name: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    /// Name of the stored secret holding the source host access token.
    pub token_secret: String,
    pub build_image: String,
    pub privileged: bool,
    pub restart_on_update: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "MyEcsAppPipeline".to_string(),
            owner: "QiuzhiLyon".to_string(),
            repo: "OnlineShopping_07".to_string(),
            branch: "main".to_string(),
            token_secret: "github-token".to_string(),
            build_image: "aws/codebuild/amazonlinux2-x86_64-standard:5.0".to_string(),
            privileged: true,
            restart_on_update: true,
        }
    }
}

impl TierformConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: TierformConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.environment.name.is_empty() {
            return invalid("environment.name must not be empty".to_string());
        }
        if self.network.max_azs == 0 {
            return invalid("network.max_azs must be at least 1".to_string());
        }
        if semver::Version::parse(&self.database.engine_version).is_err() {
            return invalid(format!(
                "database.engine_version '{}' is not a major.minor.patch version",
                self.database.engine_version
            ));
        }
        if self.database.port == 0 {
            return invalid("database.port must be non-zero".to_string());
        }

        let scaling = &self.service.scaling;
        if scaling.min_capacity == 0 || scaling.min_capacity > scaling.max_capacity {
            return invalid(format!(
                "service.scaling capacity range [{}, {}] is empty",
                scaling.min_capacity, scaling.max_capacity
            ));
        }
        if !(self.service.desired_count >= scaling.min_capacity
            && self.service.desired_count <= scaling.max_capacity)
        {
            return invalid(format!(
                "service.desired_count {} outside [{}, {}]",
                self.service.desired_count, scaling.min_capacity, scaling.max_capacity
            ));
        }
        if !(scaling.target_cpu_percent > 0.0 && scaling.target_cpu_percent <= 100.0) {
            return invalid(format!(
                "service.scaling.target_cpu_percent {} outside (0, 100]",
                scaling.target_cpu_percent
            ));
        }
        if self.service.placeholder_port == 0 || self.service.app_port == 0 {
            return invalid("service ports must be non-zero".to_string());
        }

        parse_duration(&scaling.scale_in_cooldown)?;
        parse_duration(&scaling.scale_out_cooldown)?;
        if parse_duration(&self.bootstrap.timeout)?.is_zero() {
            return invalid("bootstrap.timeout must be positive".to_string());
        }
        if self.bootstrap.execution_id.is_empty() {
            return invalid("bootstrap.execution_id must not be empty".to_string());
        }
        Ok(())
    }

    pub fn bootstrap_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.bootstrap.timeout)
    }
}

/// Parse a duration string like `"30s"`, `"5m"`, `"1h"` or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let (digits, multiplier) = if let Some(n) = s.strip_suffix('s') {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600)
    } else {
        (s, 1)
    };
    let n = digits
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(format!("invalid duration '{s}'")))?;
    n.checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::Invalid(format!("duration '{s}' is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DeploymentMode, USE_PIPELINE_IMAGE};

    #[test]
    fn defaults_describe_reference_topology() {
        let config = TierformConfig::default();
        config.validate().unwrap();
        assert_eq!(config.network.max_azs, 3);
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.service.scaling.min_capacity, 3);
        assert_eq!(config.service.scaling.max_capacity, 6);
        assert_eq!(config.bootstrap_timeout().unwrap(), Duration::from_secs(300));
        assert_eq!(config.bootstrap.gate, GateMode::Completion);
    }

    #[test]
    fn parse_partial_file() {
        let config = TierformConfig::from_toml_str(
            r#"
[environment]
name = "staging"

[service]
cpu = 512
memory_mib = 1024

[bootstrap]
gate = "trigger"

[context]
usePipelineImage = "true"
"#,
        )
        .unwrap();
        assert_eq!(config.environment.name, "staging");
        assert_eq!(config.environment.region, "us-east-1");
        assert_eq!(config.service.pipeline_sizing().cpu, 512);
        assert_eq!(config.service.container_name, "onlineshopping");
        assert_eq!(config.bootstrap.gate, GateMode::Trigger);
        assert_eq!(config.context.get(USE_PIPELINE_IMAGE), Some("true"));
        assert_eq!(config.context.mode(), DeploymentMode::Pipeline);
    }

    #[test]
    fn rejects_inverted_capacity() {
        let err = TierformConfig::from_toml_str(
            r#"
[service.scaling]
min_capacity = 6
max_capacity = 3
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("capacity range"));
    }

    #[test]
    fn rejects_bad_engine_version() {
        let err = TierformConfig::from_toml_str(
            r#"
[database]
engine_version = "eight"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = TierformConfig::default();
        let text = config.to_toml_string().unwrap();
        let back = TierformConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.pipeline.name, "MyEcsAppPipeline");
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn oversized_duration_is_rejected() {
        assert!(parse_duration("18446744073709551h").is_err());
        assert!(parse_duration("18446744073709551615s").is_ok());
        let err = TierformConfig::from_toml_str("[bootstrap]\ntimeout = \"18446744073709551h\"\n").unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn zero_bootstrap_timeout_is_rejected() {
        let err = TierformConfig::from_toml_str("[bootstrap]\ntimeout = \"0s\"\n").unwrap_err();
        assert!(err.to_string().contains("bootstrap.timeout"));
    }
}
