//! Graph construction errors.

use thiserror::Error;

/// Errors raised while building or validating a provisioning graph.
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("duplicate logical id: {0}")]
    DuplicateNode(String),

    #[error("unknown dependency '{dependency}' on node '{node}'")]
    UnknownDependency { node: String, dependency: String },

    #[error("node '{node}' references unknown node '{target}'")]
    UnknownReference { node: String, target: String },

    #[error("dependency cycle involving: {0}")]
    Cycle(String),

    #[error("invalid topology: {0}")]
    Invalid(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type GraphResult<T> = Result<T, GraphError>;

impl From<tierform_core::ConfigError> for GraphError {
    fn from(e: tierform_core::ConfigError) -> Self {
        GraphError::Config(e.to_string())
    }
}
