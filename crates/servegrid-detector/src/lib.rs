//! servegrid-detector: the decision side of the control loop.
//!
//! The [`Detector`] owns the task registry. On every tick it walks the
//! registered tasks and, for each auto-scaled task that is running, asks
//! the remote advisor whether the task is anomalous:
//!
//! ```text
//!  tick ─► auto + running? ─► metrics ─► anomaly_detect ─► anomalous?
//!                                                              │ yes
//!          history ◄── queue.append(spec) ◄── apply ◄── anomaly_recover
//! ```
//!
//! Nothing here touches infrastructure directly: updated specs go onto
//! the task queue and the scaler applies them.

pub mod advisor;
pub mod detector;
pub mod error;
pub mod sync;

pub use advisor::RecommendClient;
pub use detector::{Detector, HISTORY_LIMIT, TaskView};
pub use error::{AdvisorError, AdvisorResult, DetectorError, DetectorResult};
pub use sync::StatusSync;
