//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur while reconciling infrastructure.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("container engine error: {0}")]
    Engine(String),

    #[error("cluster error: {0}")]
    Cluster(String),

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("gpu discovery failed: {0}")]
    GpuDiscovery(String),

    #[error("reconcile of {task} failed for: {kinds}")]
    Reconcile { task: String, kinds: String },

    #[error("state store error: {0}")]
    State(#[from] servegrid_state::StateError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
