//! Graph API error types.

use std::time::Duration;

use adlens_retry::Transient;
use thiserror::Error;

/// Result type for Graph API operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors that can occur during Graph API operations.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Rate limited, retry after {0}ms")]
    RateLimited(u64),

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraphError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::AuthError(message),
            404 => Self::NotFound(message),
            429 => Self::RateLimited(1000),
            500..=599 => Self::ServerError { status, message },
            _ => Self::RequestFailed(format!("HTTP {}: {}", status, message)),
        }
    }

    /// HTTP status for metrics, when one applies.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::AuthError(_) => Some(401),
            Self::NotFound(_) => Some(404),
            Self::RateLimited(_) => Some(429),
            Self::ServerError { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl Transient for GraphError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            GraphError::Network(_) | GraphError::RateLimited(_) | GraphError::ServerError { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            GraphError::RateLimited(ms) => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}
