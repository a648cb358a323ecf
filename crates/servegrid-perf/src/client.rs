//! Per-task metrics fan-out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use servegrid_core::{AnomalyRecoverRequest, BackendConfig, Metrics, TaskSpec};

use crate::error::{PerfError, PerfResult};
use crate::prometheus::{PrometheusClient, QueryWindow};
use crate::query::MetricQuery;

/// Builds the metrics payload the advisor endpoints expect.
#[derive(Clone)]
pub struct PerformanceClient {
    prometheus: PrometheusClient,
    lookback: Duration,
    step: String,
}

impl PerformanceClient {
    pub fn new(prometheus: PrometheusClient, lookback: Duration, step: impl Into<String>) -> Self {
        Self {
            prometheus,
            lookback,
            step: step.into(),
        }
    }

    /// Collect the six series for `spec` and pair them with its current
    /// engine configuration and model metadata.
    ///
    /// Fails before issuing any query when the task's engine has no
    /// metrics mapping.
    pub async fn current_metric_params(&self, spec: &TaskSpec) -> PerfResult<AnomalyRecoverRequest> {
        let configurations = match &spec.backend {
            BackendConfig::Vllm(cfg) => cfg.clone(),
            other => return Err(PerfError::UnsupportedBackend(other.kind().to_string())),
        };

        let window = QueryWindow::ending_now(self.lookback, self.step.clone());
        let replicas: Arc<Mutex<BTreeMap<String, Metrics>>> = Arc::new(Mutex::new(BTreeMap::new()));
        let mut queries = JoinSet::new();

        for query in MetricQuery::ALL {
            let prometheus = self.prometheus.clone();
            let window = window.clone();
            let replicas = replicas.clone();
            let promql = query.render(&spec.exporter_service_name);
            let task = spec.name.clone();

            queries.spawn(async move {
                match prometheus.query_range(&promql, &window).await {
                    Ok(series) => {
                        let mut replicas = replicas.lock().await;
                        for s in &series {
                            let entry = replicas.entry(s.identity()).or_default();
                            query.slot(entry).extend(s.points());
                        }
                    }
                    Err(e) => {
                        warn!(%task, metric = query.name(), error = %e, "metrics query failed");
                    }
                }
            });
        }

        while let Some(joined) = queries.join_next().await {
            if let Err(e) = joined {
                warn!(task = %spec.name, error = %e, "metrics query task aborted");
            }
        }

        let metrics: Vec<Metrics> = std::mem::take(&mut *replicas.lock().await)
            .into_values()
            .collect();
        debug!(task = %spec.name, replicas = metrics.len(), "metrics collected");

        Ok(AnomalyRecoverRequest {
            metrics,
            configurations,
            llm: spec.model_config.llm.clone(),
            gpu: spec.model_config.gpu.clone(),
        })
    }
}
