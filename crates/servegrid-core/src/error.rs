//! Error types for the task model.

use thiserror::Error;

/// Result type alias for task model operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while parsing or validating task specs.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("invalid backend config for {backend}: {reason}")]
    InvalidBackendConfig { backend: String, reason: String },

    #[error("invalid task: {0}")]
    InvalidTask(String),
}
