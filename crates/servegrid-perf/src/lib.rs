//! servegrid-perf: live performance metrics for serving tasks.
//!
//! For one task the [`PerformanceClient`] runs six Prometheus range queries
//! concurrently over a shared time window, waits for all of them, and
//! folds the returned series into one [`Metrics`] bundle per replica:
//!
//! ```text
//!            ┌─ pending_requests ──────┐
//!            ├─ active_requests ───────┤
//!  spawn ────┼─ running_requests ──────┼──► Mutex<replica → Metrics> ──► join all
//!            ├─ gpu_kv_cache_usage ────┤
//!            ├─ server_new_requests ───┤
//!            └─ server_success_requests┘
//! ```
//!
//! A failed query is logged and leaves its series empty; it never aborts
//! the other five.
//!
//! [`Metrics`]: servegrid_core::Metrics

pub mod client;
pub mod error;
pub mod prometheus;
pub mod query;

pub use client::PerformanceClient;
pub use error::{PerfError, PerfResult};
pub use prometheus::{PrometheusClient, QueryWindow};
pub use query::MetricQuery;
