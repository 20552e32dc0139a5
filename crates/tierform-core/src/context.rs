//! Deployment context (`-c key=value`) and mode selection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Context key that switches the application to the pipeline-built image.
pub const USE_PIPELINE_IMAGE: &str = "usePipelineImage";

/// Free-form context values supplied at synthesis/deploy time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeployContext(BTreeMap<String, String>);

impl DeployContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    /// Parse a `key=value` pair as given on the command line.
    pub fn parse_pair(pair: &str) -> Result<(String, String), ConfigError> {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| ConfigError::Invalid(format!("context entry '{pair}' is not key=value")))?;
        if k.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("context entry '{pair}' has an empty key")));
        }
        Ok((k.trim().to_string(), v.to_string()))
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.0.insert(key, value);
    }

    /// Layer `other` on top of `self`; `other` wins on conflicts.
    pub fn merged(mut self, other: &DeployContext) -> Self {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Evaluate the deployment mode. Only the exact string `"true"` selects
    /// pipeline mode.
    pub fn mode(&self) -> DeploymentMode {
        match self.get(USE_PIPELINE_IMAGE) {
            Some("true") => DeploymentMode::Pipeline,
            _ => DeploymentMode::Bootstrap,
        }
    }
}

/// The two mutually exclusive application configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// Placeholder public image, port 80, fixed sizing.
    Bootstrap,
    /// Repository `latest` image, application port, configured sizing.
    Pipeline,
}

impl DeploymentMode {
    pub fn label(&self) -> &'static str {
        match self {
            DeploymentMode::Bootstrap => "bootstrap",
            DeploymentMode::Pipeline => "pipeline",
        }
    }
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_flag_is_bootstrap() {
        assert_eq!(DeployContext::new().mode(), DeploymentMode::Bootstrap);
    }

    #[test]
    fn only_exact_true_selects_pipeline() {
        for value in ["TRUE", "True", "1", "yes", "", "false", " true"] {
            let ctx = DeployContext::new().with(USE_PIPELINE_IMAGE, value);
            assert_eq!(ctx.mode(), DeploymentMode::Bootstrap, "value {value:?}");
        }
        let ctx = DeployContext::new().with(USE_PIPELINE_IMAGE, "true");
        assert_eq!(ctx.mode(), DeploymentMode::Pipeline);
    }

    #[test]
    fn parse_pair_splits_on_first_equals() {
        let (k, v) = DeployContext::parse_pair("usePipelineImage=true").unwrap();
        assert_eq!(k, "usePipelineImage");
        assert_eq!(v, "true");

        let (_, v) = DeployContext::parse_pair("a=b=c").unwrap();
        assert_eq!(v, "b=c");

        assert!(DeployContext::parse_pair("novalue").is_err());
        assert!(DeployContext::parse_pair("=x").is_err());
    }

    #[test]
    fn merge_prefers_overrides() {
        let file = DeployContext::new().with(USE_PIPELINE_IMAGE, "true");
        let cli = DeployContext::new().with(USE_PIPELINE_IMAGE, "false");
        assert_eq!(file.merged(&cli).mode(), DeploymentMode::Bootstrap);
    }
}
