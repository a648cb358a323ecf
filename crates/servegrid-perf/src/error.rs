//! Performance client error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PerfError {
    #[error("metrics are not collected for backend {0}")]
    UnsupportedBackend(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("prometheus returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("query failed: {0}")]
    Query(String),
}

pub type PerfResult<T> = Result<T, PerfError>;
