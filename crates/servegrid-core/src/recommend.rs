//! Payloads exchanged with the remote advisor service.

use serde::{Deserialize, Serialize};

use crate::backend::VllmBackendConfig;
use crate::types::{GpuConfig, LlmConfig};

/// One `(unix_seconds, value)` sample.
pub type MetricPoint = [f64; 2];

/// Suggested engine configuration, returned by both `config_recommend`
/// and `anomaly_recover`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigRecommendation {
    pub max_num_seqs: u32,
    pub tensor_parallel_size: u32,
    pub gpu_memory_utilization: f32,
    pub replicas: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecommendRequest {
    pub llm: LlmConfig,
    pub gpu: GpuConfig,
}

/// Six time series for one replica, keyed on the wire by metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    pub active_requests: Vec<MetricPoint>,
    pub running_requests: Vec<MetricPoint>,
    pub pending_requests: Vec<MetricPoint>,
    pub gpu_kv_cache_usage: Vec<MetricPoint>,
    pub server_new_requests: Vec<MetricPoint>,
    pub server_success_requests: Vec<MetricPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyDetectRequest {
    pub metrics: Vec<Metrics>,
    pub configurations: VllmBackendConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecoverRequest {
    pub metrics: Vec<Metrics>,
    pub configurations: VllmBackendConfig,
    pub llm: LlmConfig,
    pub gpu: GpuConfig,
}

impl AnomalyRecoverRequest {
    pub fn detect_request(&self) -> AnomalyDetectRequest {
        AnomalyDetectRequest {
            metrics: self.metrics.clone(),
            configurations: self.configurations.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyDetectResult {
    pub is_anomaly: i64,
}

impl AnomalyDetectResult {
    pub fn is_anomalous(&self) -> bool {
        self.is_anomaly > 0
    }
}

/// History record written after each recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyRecommendResult {
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    pub is_anomaly: bool,
    pub config_recommend_result: ConfigRecommendation,
    /// Configuration and replica count in effect before the recommendation
    /// was applied.
    pub current_config: ConfigRecommendation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_record_wire_names() {
        let record = AnomalyRecommendResult {
            timestamp: 1_700_000_000_000,
            is_anomaly: true,
            config_recommend_result: ConfigRecommendation::default(),
            current_config: ConfigRecommendation {
                replicas: 2,
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["isAnomaly"], true);
        assert!(value["configRecommendResult"].is_object());
        assert_eq!(value["currentConfig"]["replicas"], 2);
    }

    #[test]
    fn test_metrics_points_serialize_as_pairs() {
        let metrics = Metrics {
            pending_requests: vec![[1.0, 2.5]],
            ..Default::default()
        };
        let value = serde_json::to_value(&metrics).unwrap();
        assert_eq!(value["pending_requests"][0][1], 2.5);
    }

    #[test]
    fn test_anomaly_flag() {
        let r: AnomalyDetectResult = serde_json::from_str(r#"{"is_anomaly": 1}"#).unwrap();
        assert!(r.is_anomalous());
        let r: AnomalyDetectResult = serde_json::from_str("{}").unwrap();
        assert!(!r.is_anomalous());
    }
}
