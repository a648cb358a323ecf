//! Container engine seam.

use async_trait::async_trait;

use servegrid_core::RuntimeInfo;

use crate::error::SchedulerResult;

/// Everything needed to start one serving replica.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLaunch {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    /// `host_path:container_path` pairs.
    pub binds: Vec<String>,
    pub port: u16,
    pub gpu_ids: Vec<String>,
    pub network: String,
    pub network_alias: String,
}

/// Minimal container lifecycle used by the pool scheduler.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Pull `image` unless it is already present.
    async fn ensure_image(&self, image: &str) -> SchedulerResult<()>;

    /// Create a container without starting it, returning its id.
    async fn create(&self, launch: &ContainerLaunch) -> SchedulerResult<String>;

    /// Start a created container.
    async fn start(&self, id: &str) -> SchedulerResult<()>;

    /// Stop and remove a container. A container that no longer exists
    /// counts as removed.
    async fn stop_and_remove(&self, id: &str) -> SchedulerResult<()>;

    /// Current name and status, or `None` if the container is gone.
    async fn inspect(&self, id: &str) -> SchedulerResult<Option<RuntimeInfo>>;
}
