//! The capability every resource backend provides.

use async_trait::async_trait;

use servegrid_core::{RuntimeInfo, TaskSpec};

use crate::error::SchedulerResult;

/// Executes desired task state on some infrastructure.
///
/// Implementations are driven by a single consumer, but must be
/// `Send + Sync` because the detector and the HTTP boundary query
/// runtime status concurrently.
#[async_trait]
pub trait ResourceBackend: Send + Sync {
    /// Converge the task's runtime instances to `spec`.
    async fn deploy_task(&self, spec: &TaskSpec) -> SchedulerResult<()>;

    /// Remove every runtime instance of the task. Safe to repeat.
    async fn delete_task(&self, spec: &TaskSpec) -> SchedulerResult<()>;

    /// Whether the task currently has a running instance.
    async fn is_task_running(&self, spec: &TaskSpec) -> SchedulerResult<bool>;

    /// Per-instance status, for display and error classification.
    async fn runtime_infos(&self, spec: &TaskSpec) -> SchedulerResult<Vec<RuntimeInfo>>;
}
