//! servegrid-core: shared types for the ServeGrid control plane.
//!
//! Everything the detector, the scaler and the resource backends exchange
//! lives here:
//!
//! - [`TaskSpec`]: the desired state of one model-serving task
//! - [`BackendConfig`]: per-engine tunables with update-if-unset merging
//! - recommendation and metrics payloads sent to the remote advisor
//! - the launch command builder shared by both resource backends
//! - [`ServegridConfig`]: the daemon's `servegrid.toml`

pub mod backend;
pub mod command;
pub mod config;
pub mod error;
pub mod recommend;
pub mod types;

pub use backend::{BackendConfig, VllmBackendConfig};
pub use command::build_launch_command;
pub use config::{ResourceBackendKind, ServegridConfig};
pub use error::{CoreError, CoreResult};
pub use recommend::*;
pub use types::*;
