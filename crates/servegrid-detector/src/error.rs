//! Detector error types.

use thiserror::Error;

/// Failures talking to the remote advisor service.
#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("advisor returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("advisor response has no result")]
    MissingResult,

    #[error("malformed advisor result: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type AdvisorResult<T> = Result<T, AdvisorError>;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("task {0} is not registered")]
    UnknownTask(String),

    #[error(transparent)]
    Core(#[from] servegrid_core::CoreError),

    #[error("advisor: {0}")]
    Advisor(#[from] AdvisorError),

    #[error("metrics: {0}")]
    Perf(#[from] servegrid_perf::PerfError),

    #[error("resource backend: {0}")]
    Backend(#[from] servegrid_scheduler::SchedulerError),

    #[error("state store: {0}")]
    State(#[from] servegrid_state::StateError),

    #[error(transparent)]
    Queue(#[from] servegrid_queue::QueueError),
}

pub type DetectorResult<T> = Result<T, DetectorError>;
