//! Task model shared across ServeGrid crates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backend::BackendConfig;
use crate::config::ServingConfig;
use crate::error::{CoreError, CoreResult};
use crate::recommend::ConfigRecommendation;

/// Desired state of one model-serving task.
///
/// `name` is the primary key across the registry, the queue and the
/// durable store. A `replica` of zero means "tear everything down".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSpec {
    pub name: String,
    pub model: String,
    pub host: String,
    pub port: u16,
    pub image: String,
    pub exporter_endpoint: String,
    pub exporter_service_name: String,
    pub model_config: ModelConfig,
    #[serde(flatten)]
    pub backend: BackendConfig,
    pub backend_extra_config: BTreeMap<String, String>,
    pub replica: u32,
    pub envs: Vec<EnvVar>,
    pub gpus: String,
    pub volumes: Vec<VolumeMount>,
    pub namespace: String,
    pub node_selector: BTreeMap<String, String>,
    pub ingress: IngressConfig,
    pub service: ServiceConfig,
    pub resources: ResourceRequest,
    pub scaling_strategy: ScalingStrategy,
    pub collector: CollectorConfig,
}

impl TaskSpec {
    /// Apply a recommendation: the replica count is always taken, engine
    /// fields only where the caller left them unset.
    pub fn apply_recommendation(&mut self, rec: &ConfigRecommendation) {
        self.replica = rec.replicas;
        self.backend.update(rec);
    }

    /// The configuration in effect, in the shape the advisor recommends.
    /// `None` when the engine has no such shape.
    pub fn current_config(&self) -> Option<ConfigRecommendation> {
        let cfg = self.backend.as_vllm()?;
        Some(ConfigRecommendation {
            max_num_seqs: cfg.max_num_seqs,
            tensor_parallel_size: cfg.tensor_parallel_size,
            gpu_memory_utilization: cfg.gpu_memory_utilization,
            replicas: self.replica,
        })
    }

    /// GPUs each replica of this task should get.
    pub fn preferred_gpu_count(&self) -> u32 {
        self.backend.preferred_gpu_count()
    }

    pub fn is_auto_scaled(&self) -> bool {
        self.scaling_strategy.strategy == Strategy::Auto
    }

    /// Fill fields a deploy request may leave out from daemon defaults.
    pub fn fill_defaults(&mut self, serving: &ServingConfig) {
        if self.exporter_service_name.is_empty() {
            self.exporter_service_name = format!(
                "{}-{}-{}",
                serving.name, self.model_config.llm.framework, self.model_config.version
            );
        }
        if self.gpus.is_empty() {
            self.gpus = "all".to_string();
        }
        if self.image.is_empty() {
            self.image = serving.image.clone();
        }
    }

    /// Reject specs that cannot be scheduled anywhere.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidTask("name must not be empty".to_string()));
        }
        if self.name.contains(char::is_whitespace) || self.name.contains('/') {
            return Err(CoreError::InvalidTask(format!(
                "name {:?} contains illegal characters",
                self.name
            )));
        }
        if self.model.trim().is_empty() {
            return Err(CoreError::InvalidTask(format!(
                "task {} has no model",
                self.name
            )));
        }
        Ok(())
    }
}

/// Model and hardware metadata the advisor reasons about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub llm: LlmConfig,
    pub gpu: GpuConfig,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub framework: String,
    /// Parameter count in billions.
    pub param: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    pub name: String,
    /// Memory per card in GiB.
    pub spec: u32,
    pub num: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    #[serde(rename = "mountPath")]
    pub mount_path: String,
    #[serde(rename = "hostPath")]
    pub host_path: String,
}

/// HTTP ingress rules for the cluster backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    pub name: String,
    pub paths: Vec<IngressPath>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressPath {
    pub path: String,
    pub backend: IngressBackend,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressBackend {
    pub service: IngressServiceRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressServiceRef {
    pub name: String,
    pub port: PortNumber,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortNumber {
    pub number: i32,
}

/// Cluster service exposing the task's replicas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub ports: Vec<PortNumber>,
}

/// GPU request for the cluster backend (`gpu` is a quantity string).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequest {
    pub gpu: String,
    pub gpu_type: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Manual,
    Auto,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingStrategy {
    pub strategy: Strategy,
}

/// Per-task telemetry pipeline settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub enable: bool,
    pub cluster_id: String,
    pub kafka: KafkaConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub username: String,
    pub password: String,
}

/// Lifecycle status of a registered task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Created,
    Scheduling,
    Running,
    Error,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Created => "created",
            TaskStatus::Scheduling => "scheduling",
            TaskStatus::Running => "running",
            TaskStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// A registered task and its last observed status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectTask {
    pub spec: TaskSpec,
    pub status: TaskStatus,
}

impl DetectTask {
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            spec,
            status: TaskStatus::Created,
        }
    }
}

/// One live runtime instance (container or pod) of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub id: String,
    pub name: String,
    /// Engine-reported status, e.g. `running`, `exited`, `Pending`.
    pub status: String,
}

impl RuntimeInfo {
    pub fn is_running(&self) -> bool {
        self.status.eq_ignore_ascii_case("running")
    }

    pub fn is_exited(&self) -> bool {
        self.status.eq_ignore_ascii_case("exited")
    }
}
