//! servegrid-scheduler: converges infrastructure to a desired `TaskSpec`.
//!
//! Two resource backends sit behind one [`ResourceBackend`] capability,
//! picked once at startup:
//!
//! - [`ContainerPoolScheduler`]: containers on the local Docker engine,
//!   with GPU indices handed out from an in-process pool
//! - [`ClusterReconciler`]: Deployment, Service, Ingress and telemetry
//!   collector objects on a Kubernetes cluster
//!
//! The [`Scaler`] is the single consumer of the task queue and drives the
//! chosen backend one spec at a time:
//!
//! ```text
//! TaskReceiver::pop ──► replica == 0 ? backend.delete_task : backend.deploy_task
//! ```

pub mod backend;
pub mod cluster;
pub mod container;
pub mod error;
pub mod scaler;

pub use backend::ResourceBackend;
pub use cluster::{ClusterApi, ClusterContext, ClusterReconciler, KubeClusterApi, ObjectKind};
pub use container::{
    ContainerEngine, ContainerLaunch, ContainerPoolScheduler, DockerEngine, GpuPool, GpuStatus,
};
pub use error::{SchedulerError, SchedulerResult};
pub use scaler::Scaler;
