//! Engine error types.

use thiserror::Error;
use tierform_state::WorkflowStatus;

/// Errors that abort a provisioning run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("graph error: {0}")]
    Graph(#[from] tierform_graph::GraphError),

    #[error("state store error: {0}")]
    State(#[from] tierform_state::StateError),

    #[error("provider failed on '{node}': {message}")]
    Provider { node: String, message: String },

    #[error("node '{node}' has unresolved reference {reference}")]
    Unresolved { node: String, reference: String },

    #[error("bootstrap execution '{execution}' ended {}", .status.label())]
    Bootstrap {
        execution: String,
        status: WorkflowStatus,
    },

    #[error("no running execution '{0}' to wait on")]
    MissingExecution(String),

    #[error("task join error: {0}")]
    Join(String),

    #[error("serialization error: {0}")]
    Serialize(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
