pub mod autoscale;
pub mod deploy;
pub mod pipeline;
pub mod status;
pub mod synth;

use std::path::{Path, PathBuf};

use tierform_core::{DeployContext, TierformConfig};
use tierform_graph::{build_topology, Topology};
use tierform_state::StateStore;
use tracing::{debug, info};

/// Loaded configuration plus command-line context, shared by every command.
pub struct Workspace {
    pub config: TierformConfig,
    pub overrides: DeployContext,
    state_dir: PathBuf,
}

impl Workspace {
    pub fn load(config: &Path, state_dir: &Path, context: Vec<(String, String)>) -> anyhow::Result<Self> {
        let loaded = TierformConfig::load_or_default(config)?;
        debug!(path = %config.display(), exists = config.exists(), "configuration loaded");
        let mut overrides = DeployContext::new();
        for (key, value) in context {
            overrides.insert(key, value);
        }
        Ok(Self {
            config: loaded,
            overrides,
            state_dir: state_dir.to_path_buf(),
        })
    }

    pub fn environment(&self) -> &str {
        &self.config.environment.name
    }

    pub fn topology(&self) -> anyhow::Result<Topology> {
        let topology = build_topology(&self.config, &self.overrides)?;
        info!(mode = %topology.mode, nodes = topology.graph.len(), "topology built");
        Ok(topology)
    }

    pub fn store(&self) -> anyhow::Result<StateStore> {
        std::fs::create_dir_all(&self.state_dir)?;
        let path = self.state_dir.join("tierform.redb");
        let store = StateStore::open(&path)?;
        debug!(path = ?path, "state store opened");
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierform_core::DeploymentMode;

    #[test]
    fn command_line_context_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("tierform.toml");
        std::fs::write(&config, "[context]\nusePipelineImage = \"true\"\n").unwrap();

        let ws = Workspace::load(&config, dir.path(), vec![]).unwrap();
        assert_eq!(ws.topology().unwrap().mode, DeploymentMode::Pipeline);

        let ws = Workspace::load(
            &config,
            dir.path(),
            vec![("usePipelineImage".to_string(), "false".to_string())],
        )
        .unwrap();
        assert_eq!(ws.topology().unwrap().mode, DeploymentMode::Bootstrap);
    }

    #[test]
    fn missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::load(&dir.path().join("absent.toml"), dir.path(), vec![]).unwrap();
        assert_eq!(ws.environment(), "dev");
        assert_eq!(ws.topology().unwrap().mode, DeploymentMode::Bootstrap);
        assert!(ws.store().is_ok());
    }
}
