//! servegrid-api: REST API for ServeGrid.
//!
//! Thin axum layer over the [`Detector`]: requests register, describe and
//! delete tasks, and expose the anomaly history. Every response uses the
//! same envelope:
//!
//! ```json
//! {"code": 0, "message": "ok", "result": ..., "trace_id": "<uuid>", "version": "v1"}
//! ```
//!
//! # API Routes
//!
//! All paths are relative to the configured `url_prefix`.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/deploy` | Register a task and queue its deployment |
//! | GET | `/deploy?task_name=X` | Spec, status and runtime instances |
//! | DELETE | `/deploy?task_name=X` | Scale the task to zero and unregister it |
//! | GET | `/task/detect/history?task_name=X` | Recent anomaly records, newest first |
//! | GET | `/healthz` | Liveness, registered and queued task counts |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use servegrid_core::config::ServingConfig;
use servegrid_detector::Detector;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub detector: Arc<Detector>,
    /// Defaults for fields a deploy request leaves out.
    pub serving: ServingConfig,
    /// Reported in every response envelope.
    pub version: String,
}

/// Build the API router, nested under `url_prefix`.
pub fn build_router(state: ApiState, url_prefix: &str) -> Router {
    let api_routes = Router::new()
        .route(
            "/deploy",
            get(handlers::get_task)
                .post(handlers::deploy_task)
                .delete(handlers::delete_task),
        )
        .route("/task/detect/history", get(handlers::detect_history))
        .route("/healthz", get(handlers::healthz))
        .with_state(state);

    let prefix = url_prefix.trim_matches('/');
    if prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(&format!("/{prefix}"), api_routes)
    }
}
