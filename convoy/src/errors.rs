//! Error types for the reconciler

use thiserror::Error;

/// Main error type for a reconciliation run
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Required input missing or invalid. Raised before any remote mutation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A remote object exists in a state that needs manual intervention
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Throttling, timeouts and other retryable control plane failures
    #[error("Transient control plane error: {0}")]
    TransientControlPlane(String),

    /// Non-retryable control plane failure
    #[error("Control plane error: {0}")]
    ControlPlane(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReconcileError {
    /// Shorthand for a configuration error naming a field
    pub fn missing(field: &str) -> Self {
        ReconcileError::Configuration(format!("missing required field '{}'", field))
    }

    /// Whether a read may be retried after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::TransientControlPlane(_) => true,
            ReconcileError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Process exit code reported for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ReconcileError::Configuration(_) => 2,
            ReconcileError::Conflict(_) => 3,
            ReconcileError::TransientControlPlane(_)
            | ReconcileError::ControlPlane(_)
            | ReconcileError::Http(_) => 4,
            ReconcileError::Io(_) | ReconcileError::Json(_) | ReconcileError::Internal(_) => 5,
        }
    }
}

impl From<anyhow::Error> for ReconcileError {
    fn from(err: anyhow::Error) -> Self {
        ReconcileError::Internal(err.to_string())
    }
}
