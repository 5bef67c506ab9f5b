//! Pipeline error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::engine::{PipelineState, StateField};

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Stage {stage} read undeclared field {field}")]
    UndeclaredRead { stage: String, field: StateField },

    #[error("Stage {stage} wrote {field}, which it does not own")]
    UndeclaredWrite { stage: String, field: StateField },

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Stage registered twice: {0}")]
    DuplicateStage(String),

    #[error("Dependency cycle through stage {0}")]
    Cycle(String),

    #[error("Field {field} written by both {first} and {second}")]
    DuplicateWriter {
        field: StateField,
        first: String,
        second: String,
    },

    #[error("Stage {stage} reads {field}, which no upstream stage writes")]
    UnsatisfiedRead { stage: String, field: StateField },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] adlens_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] adlens_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn upstream_unavailable(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Errors raised while building a stage graph.
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            PipelineError::UnknownStage(_)
                | PipelineError::DuplicateStage(_)
                | PipelineError::Cycle(_)
                | PipelineError::DuplicateWriter { .. }
                | PipelineError::UnsatisfiedRead { .. }
        )
    }
}

/// Error of one call to an external collaborator.
///
/// Always scoped to a single item; stages decide whether it is fatal.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Graph API error: {0}")]
    Graph(#[from] adlens_graph::GraphError),

    #[error("Model error: {0}")]
    Model(#[from] adlens_llm::LlmError),

    #[error("Media error: {0}")]
    Media(#[from] adlens_media::MediaError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

impl CollaboratorError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// A run that did not reach its terminal state.
#[derive(Debug)]
pub struct RunFailure {
    /// Stage that failed; `None` when the run was cancelled between stages
    pub stage: Option<String>,
    pub error: PipelineError,
    /// State accumulated before the failure
    pub partial_state: PipelineState,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stage {
            Some(stage) => write!(f, "stage {} failed: {}", stage, self.error),
            None => write!(f, "run aborted: {}", self.error),
        }
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
