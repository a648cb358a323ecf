//! Status-sync hook for a multi-cluster control layer.

use async_trait::async_trait;

use servegrid_core::{RuntimeInfo, TaskStatus};

/// Receives each registered task's observed status once per detection
/// cycle. Errors are logged by the caller and never stop the cycle.
#[async_trait]
pub trait StatusSync: Send + Sync {
    async fn sync_status(
        &self,
        task: &str,
        status: TaskStatus,
        runtime: &[RuntimeInfo],
    ) -> anyhow::Result<()>;
}
