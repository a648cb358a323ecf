//! Container backend: replicas as Docker containers on the local host.

pub mod docker;
pub mod engine;
pub mod gpu;
pub mod scheduler;

pub use docker::DockerEngine;
pub use engine::{ContainerEngine, ContainerLaunch};
pub use gpu::{GpuPool, GpuStatus, discover_gpus};
pub use scheduler::ContainerPoolScheduler;
