//! servegrid-queue: bounded hand-off between decision and execution.
//!
//! The detector and the HTTP boundary push desired `TaskSpec`s; the scaler
//! is the single consumer. The channel carries task names only, while the
//! specs themselves sit in a shared pending map:
//!
//! ```text
//!  append(spec) ──┬── name already pending? ── replace spec, return
//!                 └── insert spec, send name ──► [bounded channel] ──► pop()
//!                                                                       │
//!                                      remove spec from pending map ◄───┘
//! ```
//!
//! A task therefore occupies at most one queue slot. Several updates for
//! the same task that arrive before the scaler picks it up collapse into
//! the newest one, and the task is free to be queued again as soon as the
//! scaler has taken it.

pub mod queue;

pub use queue::{QueueError, TaskReceiver, TaskSender, task_queue};
