//! The six PromQL templates collected for every task.

use servegrid_core::{MetricPoint, Metrics};

/// One of the per-task series fed to the advisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricQuery {
    PendingRequests,
    ActiveRequests,
    RunningRequests,
    GpuKvCacheUsage,
    ServerNewRequests,
    ServerSuccessRequests,
}

impl MetricQuery {
    pub const ALL: [MetricQuery; 6] = [
        MetricQuery::PendingRequests,
        MetricQuery::ActiveRequests,
        MetricQuery::RunningRequests,
        MetricQuery::GpuKvCacheUsage,
        MetricQuery::ServerNewRequests,
        MetricQuery::ServerSuccessRequests,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MetricQuery::PendingRequests => "pending_requests",
            MetricQuery::ActiveRequests => "active_requests",
            MetricQuery::RunningRequests => "running_requests",
            MetricQuery::GpuKvCacheUsage => "gpu_kv_cache_usage",
            MetricQuery::ServerNewRequests => "server_new_requests",
            MetricQuery::ServerSuccessRequests => "server_success_requests",
        }
    }

    /// PromQL for a task whose replicas export as `{service}-replica-*`.
    pub fn render(&self, service: &str) -> String {
        let job = format!(r#"exported_job=~"{service}-replica.*""#);
        match self {
            MetricQuery::PendingRequests => {
                format!("avg by(exported_job) (pending_requests{{{job}}})")
            }
            MetricQuery::ActiveRequests => {
                format!("avg by(exported_job) (http_server_active_requests{{{job}}})")
            }
            MetricQuery::RunningRequests => {
                format!("avg by(exported_job) (running_requests{{{job}}})")
            }
            MetricQuery::GpuKvCacheUsage => {
                format!("avg by(exported_job) (gpu_kv_cache_usage_percent{{{job}}})")
            }
            MetricQuery::ServerNewRequests => {
                format!("sum(rate(http_server_requests_total{{{job}}}[1m]) * 60) by (exported_job)")
            }
            MetricQuery::ServerSuccessRequests => format!(
                r#"avg by(service) (increase(traces_spanmetrics_calls_total{{service=~"{service}-replica.*", span_name="POST /generate", http_status_code=~"2.."}}[1m]))"#
            ),
        }
    }

    /// The field of `metrics` this query fills.
    pub fn slot<'a>(&self, metrics: &'a mut Metrics) -> &'a mut Vec<MetricPoint> {
        match self {
            MetricQuery::PendingRequests => &mut metrics.pending_requests,
            MetricQuery::ActiveRequests => &mut metrics.active_requests,
            MetricQuery::RunningRequests => &mut metrics.running_requests,
            MetricQuery::GpuKvCacheUsage => &mut metrics.gpu_kv_cache_usage,
            MetricQuery::ServerNewRequests => &mut metrics.server_new_requests,
            MetricQuery::ServerSuccessRequests => &mut metrics.server_success_requests,
        }
    }
}
