//! servegrid-state: durable per-task records for ServeGrid.
//!
//! Backed by [redb](https://docs.rs/redb). Two tables, both keyed by task
//! name with JSON-encoded values:
//!
//! - `containers`: container ids of a task's replicas, oldest first
//! - `history`: anomaly/recommendation records, newest first, bounded
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
