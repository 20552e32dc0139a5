//! Pipeline error types.

use thiserror::Error;

/// Errors that fail a pipeline execution.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source stage failed: {0}")]
    Source(String),

    #[error("build stage failed: {0}")]
    Build(String),

    #[error("invalid artifact: {0}")]
    Artifact(String),

    #[error("service '{service}' not found in environment '{environment}'")]
    ServiceNotFound { environment: String, service: String },

    #[error("deploy stage failed: {0}")]
    Deploy(String),

    #[error("service '{service}' has no container named '{container}'")]
    ContainerNotFound { service: String, container: String },

    #[error("invalid source revision: {0:?}")]
    InvalidRevision(String),

    #[error("execution {0} superseded by a newer source change")]
    Superseded(u64),

    #[error("state store error: {0}")]
    State(#[from] tierform_state::StateError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
