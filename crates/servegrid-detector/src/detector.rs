//! Task registry and the periodic anomaly-detection cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tracing::{debug, error, info, warn};

use servegrid_core::{
    AnomalyRecommendResult, ConfigRecommendRequest, CoreError, DetectTask, RuntimeInfo, TaskSpec,
    TaskStatus,
};
use servegrid_perf::PerformanceClient;
use servegrid_queue::TaskSender;
use servegrid_scheduler::ResourceBackend;
use servegrid_state::StateStore;

use crate::advisor::RecommendClient;
use crate::error::{DetectorError, DetectorResult};
use crate::sync::StatusSync;

/// Anomaly records kept per task.
pub const HISTORY_LIMIT: usize = 10;

/// A registered task as reported to API callers.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub spec: TaskSpec,
    pub status: TaskStatus,
    pub runtime: Vec<RuntimeInfo>,
}

pub struct Detector {
    registry: RwLock<HashMap<String, DetectTask>>,
    backend: Arc<dyn ResourceBackend>,
    queue: TaskSender,
    perf: PerformanceClient,
    advisor: RecommendClient,
    store: StateStore,
    status_sync: Option<Arc<dyn StatusSync>>,
}

impl Detector {
    pub fn new(
        backend: Arc<dyn ResourceBackend>,
        queue: TaskSender,
        perf: PerformanceClient,
        advisor: RecommendClient,
        store: StateStore,
    ) -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            backend,
            queue,
            perf,
            advisor,
            store,
            status_sync: None,
        }
    }

    pub fn with_status_sync(mut self, sync: Arc<dyn StatusSync>) -> Self {
        self.status_sync = Some(sync);
        self
    }

    // ── Registry ───────────────────────────────────────────────────

    /// Insert or overwrite the task with status `created`.
    pub async fn register_task(&self, spec: TaskSpec) {
        let name = spec.name.clone();
        let replaced = self
            .registry
            .write()
            .await
            .insert(name.clone(), DetectTask::new(spec))
            .is_some();
        debug!(task = %name, replaced, "task registered");
    }

    /// Queue a new desired spec and register it.
    ///
    /// Auto-scaled tasks are first seeded from the advisor; fields the
    /// caller set explicitly are kept. When seeding fails nothing is
    /// queued or registered.
    pub async fn deploy_task(&self, mut spec: TaskSpec) -> DetectorResult<()> {
        spec.validate()?;

        if spec.is_auto_scaled() {
            let request = ConfigRecommendRequest {
                llm: spec.model_config.llm.clone(),
                gpu: spec.model_config.gpu.clone(),
            };
            let rec = self.advisor.config_recommend(&request).await?;
            info!(task = %spec.name, replicas = rec.replicas, "initial configuration recommended");
            spec.apply_recommendation(&rec);
        }

        // Queue and registry change together so a recovery computed from
        // an older spec cannot slip in between them.
        let mut registry = self.registry.write().await;
        self.queue.append(spec.clone()).await?;
        let name = spec.name.clone();
        let replaced = registry.insert(name.clone(), DetectTask::new(spec)).is_some();
        debug!(task = %name, replaced, "task registered");
        Ok(())
    }

    /// Unregister the task and queue its scale-to-zero.
    ///
    /// Returns `false` when the task was not registered.
    pub async fn delete_task(&self, name: &str) -> DetectorResult<bool> {
        let mut registry = self.registry.write().await;
        let Some(task) = registry.get(name) else {
            info!(task = %name, "delete of unregistered task ignored");
            return Ok(false);
        };

        let mut spec = task.spec.clone();
        spec.replica = 0;
        self.queue.append(spec).await?;
        registry.remove(name);
        info!(task = %name, "task deleted");
        Ok(true)
    }

    pub async fn task_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Specs handed to the scaler but not yet picked up.
    pub async fn queued_tasks(&self) -> usize {
        self.queue.pending_len().await
    }

    async fn set_status(&self, name: &str, status: TaskStatus) {
        if let Some(task) = self.registry.write().await.get_mut(name) {
            task.status = status;
        }
    }

    // ── Status ─────────────────────────────────────────────────────

    /// Ask the backend whether the task runs and record the resulting
    /// status: `running`, `error` when any instance exited, otherwise
    /// `scheduling`.
    pub async fn is_task_running(&self, spec: &TaskSpec) -> DetectorResult<bool> {
        let (status, _) = self.observe(spec).await?;
        Ok(status == TaskStatus::Running)
    }

    async fn observe(&self, spec: &TaskSpec) -> DetectorResult<(TaskStatus, Vec<RuntimeInfo>)> {
        let running = self.backend.is_task_running(spec).await?;
        let runtime = self.backend.runtime_infos(spec).await?;
        let status = if running {
            TaskStatus::Running
        } else if runtime.iter().any(RuntimeInfo::is_exited) {
            TaskStatus::Error
        } else {
            TaskStatus::Scheduling
        };
        self.set_status(&spec.name, status).await;
        Ok((status, runtime))
    }

    /// Spec, status and live instances of a registered task.
    pub async fn describe_task(&self, name: &str) -> DetectorResult<TaskView> {
        let task = self
            .registry
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DetectorError::UnknownTask(name.to_string()))?;

        let runtime = self.backend.runtime_infos(&task.spec).await?;
        let mut status = task.status;
        if runtime.iter().any(RuntimeInfo::is_running) {
            status = TaskStatus::Running;
            self.set_status(name, status).await;
        }

        Ok(TaskView {
            spec: task.spec,
            status,
            runtime,
        })
    }

    /// Recorded anomaly history, newest first. `None` for unknown tasks.
    pub async fn history(&self, name: &str) -> DetectorResult<Option<Vec<AnomalyRecommendResult>>> {
        if !self.registry.read().await.contains_key(name) {
            return Ok(None);
        }
        Ok(Some(self.store.list_history(name)?))
    }

    // ── Detection ──────────────────────────────────────────────────

    /// Ask the advisor whether the task is anomalous. Any failure counts
    /// as "not anomalous" for this cycle.
    pub async fn anomaly_detect(&self, spec: &TaskSpec) -> bool {
        match self.try_anomaly_detect(spec).await {
            Ok(anomalous) => {
                debug!(task = %spec.name, anomalous, "anomaly detection finished");
                anomalous
            }
            Err(e) => {
                warn!(task = %spec.name, error = %e, "anomaly detection failed");
                false
            }
        }
    }

    async fn try_anomaly_detect(&self, spec: &TaskSpec) -> DetectorResult<bool> {
        let params = self.perf.current_metric_params(spec).await?;
        let result = self.advisor.anomaly_detect(&params.detect_request()).await?;
        Ok(result.is_anomalous())
    }

    /// Fetch a recovery recommendation, queue the updated spec and record
    /// the change. Returns the spec that was queued.
    ///
    /// The recommendation is dropped (`Ok(None)`) when the task was deleted
    /// or redeployed while the advisor was being asked.
    pub async fn recover(&self, spec: &TaskSpec) -> DetectorResult<Option<TaskSpec>> {
        let current_config = spec
            .current_config()
            .ok_or_else(|| CoreError::UnsupportedBackend(spec.backend.kind().to_string()))?;

        let params = self.perf.current_metric_params(spec).await?;
        let rec = self.advisor.anomaly_recover(&params).await?;

        let mut updated = spec.clone();
        updated.apply_recommendation(&rec);
        {
            let mut registry = self.registry.write().await;
            let Some(task) = registry.get_mut(&spec.name).filter(|t| t.spec == *spec) else {
                info!(task = %spec.name, "task changed during recovery, recommendation dropped");
                return Ok(None);
            };
            self.queue.append(updated.clone()).await?;
            task.spec = updated.clone();
        }

        let record = AnomalyRecommendResult {
            timestamp: chrono::Utc::now().timestamp_millis(),
            is_anomaly: true,
            config_recommend_result: rec,
            current_config,
        };
        self.store.append_history(&spec.name, &record, HISTORY_LIMIT)?;

        info!(
            task = %spec.name,
            from = spec.replica,
            to = updated.replica,
            "recovery configuration queued"
        );
        Ok(Some(updated))
    }

    /// One pass over every registered task.
    pub async fn detect_once(&self) {
        let tasks: Vec<TaskSpec> = self
            .registry
            .read()
            .await
            .values()
            .map(|t| t.spec.clone())
            .collect();
        debug!(tasks = tasks.len(), "detection cycle started");

        for spec in tasks {
            let (status, runtime) = match self.observe(&spec).await {
                Ok(observed) => observed,
                Err(e) => {
                    warn!(task = %spec.name, error = %e, "status check failed");
                    continue;
                }
            };

            if let Some(sync) = &self.status_sync
                && let Err(e) = sync.sync_status(&spec.name, status, &runtime).await
            {
                warn!(task = %spec.name, error = %e, "status sync failed");
            }

            if !spec.is_auto_scaled() || status != TaskStatus::Running {
                continue;
            }
            if self.anomaly_detect(&spec).await
                && let Err(e) = self.recover(&spec).await
            {
                error!(task = %spec.name, error = %e, "anomaly recovery failed");
            }
        }
    }

    /// Run the detection loop. A cycle in progress always completes
    /// before shutdown is observed.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "detector started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.detect_once().await;
                }
                _ = shutdown.changed() => {
                    info!("detector shutting down");
                    break;
                }
            }
        }
    }
}
