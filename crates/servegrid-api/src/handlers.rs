//! REST API handlers.
//!
//! Each handler delegates to the `Detector` and wraps the outcome in the
//! response envelope.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use servegrid_core::TaskSpec;
use servegrid_detector::DetectorError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    code: u16,
    message: String,
    result: Option<T>,
    trace_id: String,
    version: String,
}

fn respond<T: Serialize>(
    state: &ApiState,
    status: StatusCode,
    message: String,
    result: Option<T>,
) -> Response {
    let code = if status.is_success() { 0 } else { status.as_u16() };
    let body = ApiResponse {
        code,
        message,
        result,
        trace_id: uuid::Uuid::new_v4().to_string(),
        version: state.version.clone(),
    };
    (status, Json(body)).into_response()
}

fn ok<T: Serialize>(state: &ApiState, result: T) -> Response {
    respond(state, StatusCode::OK, "ok".to_string(), Some(result))
}

fn error_response(state: &ApiState, msg: impl Into<String>, status: StatusCode) -> Response {
    respond::<()>(state, status, msg.into(), None)
}

fn detector_error(state: &ApiState, e: DetectorError) -> Response {
    let status = match &e {
        DetectorError::UnknownTask(_) => StatusCode::NOT_FOUND,
        DetectorError::Core(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %e, "request failed");
    }
    error_response(state, e.to_string(), status)
}

/// `?task_name=` query shared by the task endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TaskQuery {
    pub task_name: String,
}

impl TaskQuery {
    fn name(&self) -> Option<&str> {
        let name = self.task_name.trim();
        (!name.is_empty()).then_some(name)
    }
}

fn missing_task_name(state: &ApiState) -> Response {
    error_response(state, "task_name is required", StatusCode::BAD_REQUEST)
}

/// History payload; records are newest first.
#[derive(Serialize)]
struct HistoryResult<T: Serialize> {
    data: T,
}

// ── Tasks ──────────────────────────────────────────────────────

/// POST /deploy
pub async fn deploy_task(
    State(state): State<ApiState>,
    payload: Result<Json<TaskSpec>, JsonRejection>,
) -> Response {
    let mut spec = match payload {
        Ok(Json(spec)) => spec,
        Err(rejection) => {
            return error_response(
                &state,
                format!("invalid deploy request: {}", rejection.body_text()),
                StatusCode::BAD_REQUEST,
            );
        }
    };
    spec.fill_defaults(&state.serving);

    let name = spec.name.clone();
    match state.detector.deploy_task(spec).await {
        Ok(()) => {
            info!(task = %name, "deploy accepted");
            ok(&state, "Success")
        }
        Err(e) => detector_error(&state, e),
    }
}

/// GET /deploy?task_name=X
pub async fn get_task(State(state): State<ApiState>, Query(query): Query<TaskQuery>) -> Response {
    let Some(name) = query.name() else {
        return missing_task_name(&state);
    };
    match state.detector.describe_task(name).await {
        Ok(view) => ok(&state, view),
        Err(e) => detector_error(&state, e),
    }
}

/// DELETE /deploy?task_name=X
pub async fn delete_task(
    State(state): State<ApiState>,
    Query(query): Query<TaskQuery>,
) -> Response {
    let Some(name) = query.name() else {
        return missing_task_name(&state);
    };
    match state.detector.delete_task(name).await {
        Ok(true) => ok(&state, "Success"),
        Ok(false) => error_response(
            &state,
            format!("task {name} not found"),
            StatusCode::NOT_FOUND,
        ),
        Err(e) => detector_error(&state, e),
    }
}

// ── Detection ──────────────────────────────────────────────────

/// GET /task/detect/history?task_name=X
pub async fn detect_history(
    State(state): State<ApiState>,
    Query(query): Query<TaskQuery>,
) -> Response {
    let Some(name) = query.name() else {
        return missing_task_name(&state);
    };
    match state.detector.history(name).await {
        Ok(Some(data)) => ok(&state, HistoryResult { data }),
        Ok(None) => error_response(
            &state,
            format!("task {name} not found"),
            StatusCode::NOT_FOUND,
        ),
        Err(e) => detector_error(&state, e),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> Response {
    let tasks = state.detector.task_count().await;
    let queued = state.detector.queued_tasks().await;
    ok(
        &state,
        serde_json::json!({"status": "ok", "tasks": tasks, "queued": queued}),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::to_bytes;
    use serde_json::Value;

    use servegrid_core::config::{AdvisorConfig, ServingConfig};
    use servegrid_core::{AnomalyRecommendResult, RuntimeInfo};
    use servegrid_detector::{Detector, HISTORY_LIMIT, RecommendClient};
    use servegrid_perf::{PerformanceClient, PrometheusClient};
    use servegrid_queue::{TaskReceiver, task_queue};
    use servegrid_scheduler::{ResourceBackend, SchedulerResult};
    use servegrid_state::StateStore;

    struct IdleBackend;

    #[async_trait]
    impl ResourceBackend for IdleBackend {
        async fn deploy_task(&self, _spec: &TaskSpec) -> SchedulerResult<()> {
            Ok(())
        }

        async fn delete_task(&self, _spec: &TaskSpec) -> SchedulerResult<()> {
            Ok(())
        }

        async fn is_task_running(&self, _spec: &TaskSpec) -> SchedulerResult<bool> {
            Ok(true)
        }

        async fn runtime_infos(&self, spec: &TaskSpec) -> SchedulerResult<Vec<RuntimeInfo>> {
            Ok(vec![RuntimeInfo {
                id: "c1".into(),
                name: format!("{}-replica-0001", spec.exporter_service_name),
                status: "running".into(),
            }])
        }
    }

    fn test_state() -> (ApiState, TaskReceiver, StateStore) {
        let (tx, rx) = task_queue(8);
        let store = StateStore::open_in_memory().unwrap();
        // Nothing listens here; manual tasks never reach these clients.
        let unused = "http://127.0.0.1:9";
        let detector = Detector::new(
            Arc::new(IdleBackend),
            tx,
            PerformanceClient::new(PrometheusClient::new(unused), Duration::from_secs(60), "60s"),
            RecommendClient::new(&AdvisorConfig {
                url: unused.into(),
                path_prefix: "/api/algo/v1".into(),
            }),
            store.clone(),
        );
        let state = ApiState {
            detector: Arc::new(detector),
            serving: ServingConfig {
                image: "serve:1".into(),
                ..Default::default()
            },
            version: "v1".into(),
        };
        (state, rx, store)
    }

    fn test_spec() -> TaskSpec {
        serde_json::from_value(serde_json::json!({
            "name": "llama",
            "model": "meta/llama",
            "port": 9199,
            "replica": 2,
            "model_config": {"llm": {"framework": "llama"}, "version": "v2"},
        }))
        .unwrap()
    }

    fn query(name: &str) -> Query<TaskQuery> {
        Query(TaskQuery {
            task_name: name.to_string(),
        })
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn deploy_fills_defaults_and_queues() {
        let (state, mut rx, _) = test_state();

        let resp = deploy_task(State(state.clone()), Ok(Json(test_spec()))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["code"], 0);
        assert_eq!(body["result"], "Success");
        assert_eq!(body["version"], "v1");
        assert_eq!(body["trace_id"].as_str().unwrap().len(), 36);

        let queued = rx.try_pop().await.unwrap();
        assert_eq!(queued.exporter_service_name, "servegrid-llama-v2");
        assert_eq!(queued.image, "serve:1");
        assert_eq!(queued.gpus, "all");
    }

    #[tokio::test]
    async fn deploy_rejects_invalid_spec() {
        let (state, mut rx, _) = test_state();
        let mut spec = test_spec();
        spec.model.clear();

        let resp = deploy_task(State(state), Ok(Json(spec))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["code"], 400);
        assert!(rx.try_pop().await.is_none());
    }

    #[tokio::test]
    async fn get_task_reports_runtime() {
        let (state, _rx, _) = test_state();
        deploy_task(State(state.clone()), Ok(Json(test_spec()))).await;

        let resp = get_task(State(state), query("llama")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["result"]["status"], "running");
        assert_eq!(body["result"]["spec"]["name"], "llama");
        assert_eq!(body["result"]["runtime"][0]["status"], "running");
    }

    #[tokio::test]
    async fn get_unknown_task() {
        let (state, _rx, _) = test_state();
        let resp = get_task(State(state), query("nope")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_task_name_is_bad_request() {
        let (state, _rx, _) = test_state();
        let resp = delete_task(State(state), query("  ")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_then_delete_again() {
        let (state, mut rx, _) = test_state();
        deploy_task(State(state.clone()), Ok(Json(test_spec()))).await;
        rx.try_pop().await.unwrap();

        let resp = delete_task(State(state.clone()), query("llama")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(rx.try_pop().await.unwrap().replica, 0);

        let resp = delete_task(State(state), query("llama")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn history_wrapped_in_data() {
        let (state, _rx, store) = test_state();
        let resp = detect_history(State(state.clone()), query("llama")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        deploy_task(State(state.clone()), Ok(Json(test_spec()))).await;
        let record = AnomalyRecommendResult {
            timestamp: 42,
            is_anomaly: true,
            config_recommend_result: Default::default(),
            current_config: Default::default(),
        };
        store.append_history("llama", &record, HISTORY_LIMIT).unwrap();

        let resp = detect_history(State(state), query("llama")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["result"]["data"][0]["timestamp"], 42);
        assert_eq!(body["result"]["data"][0]["isAnomaly"], true);
    }

    #[tokio::test]
    async fn healthz_counts_tasks() {
        let (state, _rx, _) = test_state();
        deploy_task(State(state.clone()), Ok(Json(test_spec()))).await;
        let body = body_json(healthz(State(state)).await).await;
        assert_eq!(body["result"]["status"], "ok");
        assert_eq!(body["result"]["tasks"], 1);
        assert_eq!(body["result"]["queued"], 1);
    }
}
