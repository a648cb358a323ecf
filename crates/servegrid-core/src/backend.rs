//! Serving-engine configuration.
//!
//! On the wire a task carries two sibling fields, `backend` (the engine
//! kind) and `backend_config` (that engine's tunables). They are parsed
//! together into the [`BackendConfig`] sum type so that every consumer
//! works with a typed variant instead of an untyped blob.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::recommend::ConfigRecommendation;

/// Engine kind tag for [`VllmBackendConfig`].
pub const VLLM: &str = "vllm";

/// Tunables for the vLLM serving engine.
///
/// Zero and empty values mean "unset": they are omitted from the launch
/// command and may be filled in by a recommendation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VllmBackendConfig {
    pub max_num_seqs: u32,
    pub tensor_parallel_size: u32,
    pub gpu_memory_utilization: f32,
    pub vllm_mode: String,
    pub trust_remote_code: bool,
}

impl VllmBackendConfig {
    /// Merge a recommendation, touching only fields that are still unset.
    pub fn update(&mut self, rec: &ConfigRecommendation) {
        if self.max_num_seqs == 0 {
            self.max_num_seqs = rec.max_num_seqs;
        }
        if self.tensor_parallel_size == 0 {
            self.tensor_parallel_size = rec.tensor_parallel_size;
        }
        if self.gpu_memory_utilization <= 0.0 {
            self.gpu_memory_utilization = rec.gpu_memory_utilization;
        }
    }

    /// Launch flags for every field that carries a value.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.max_num_seqs > 0 {
            args.push("--max_num_seqs".to_string());
            args.push(self.max_num_seqs.to_string());
        }
        if self.tensor_parallel_size > 0 {
            args.push("--tensor_parallel_size".to_string());
            args.push(self.tensor_parallel_size.to_string());
        }
        if self.gpu_memory_utilization > 0.0 {
            args.push("--gpu_memory_utilization".to_string());
            args.push(self.gpu_memory_utilization.to_string());
        }
        if !self.vllm_mode.is_empty() {
            args.push("--vllm_mode".to_string());
            args.push(self.vllm_mode.clone());
        }
        if self.trust_remote_code {
            args.push("--trust_remote_code".to_string());
            args.push("true".to_string());
        }
        args
    }
}

/// Engine-specific configuration, one variant per supported engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BackendRepr", into = "BackendRepr")]
#[non_exhaustive]
pub enum BackendConfig {
    Vllm(VllmBackendConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Vllm(VllmBackendConfig::default())
    }
}

impl BackendConfig {
    /// The engine kind tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Vllm(_) => VLLM,
        }
    }

    /// Merge a recommendation into the variant, never overriding set fields.
    pub fn update(&mut self, rec: &ConfigRecommendation) {
        match self {
            BackendConfig::Vllm(cfg) => cfg.update(rec),
        }
    }

    /// Number of GPUs one replica of this engine wants.
    pub fn preferred_gpu_count(&self) -> u32 {
        match self {
            BackendConfig::Vllm(cfg) => cfg.tensor_parallel_size.max(1),
        }
    }

    pub fn launch_args(&self) -> Vec<String> {
        match self {
            BackendConfig::Vllm(cfg) => cfg.launch_args(),
        }
    }

    pub fn as_vllm(&self) -> Option<&VllmBackendConfig> {
        match self {
            BackendConfig::Vllm(cfg) => Some(cfg),
        }
    }
}

/// Wire shape: `{"backend": "...", "backend_config": {...}}`.
#[derive(Serialize, Deserialize)]
struct BackendRepr {
    #[serde(default = "default_backend")]
    backend: String,
    #[serde(default)]
    backend_config: serde_json::Value,
}

fn default_backend() -> String {
    VLLM.to_string()
}

impl TryFrom<BackendRepr> for BackendConfig {
    type Error = CoreError;

    fn try_from(repr: BackendRepr) -> Result<Self, Self::Error> {
        match repr.backend.as_str() {
            VLLM => {
                let value = match repr.backend_config {
                    serde_json::Value::Null => serde_json::Value::Object(Default::default()),
                    other => other,
                };
                let cfg = serde_json::from_value(value).map_err(|e| {
                    CoreError::InvalidBackendConfig {
                        backend: repr.backend.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(BackendConfig::Vllm(cfg))
            }
            other => Err(CoreError::UnsupportedBackend(other.to_string())),
        }
    }
}

impl From<BackendConfig> for BackendRepr {
    fn from(cfg: BackendConfig) -> Self {
        let backend = cfg.kind().to_string();
        let backend_config = match cfg {
            BackendConfig::Vllm(v) => serde_json::to_value(v).unwrap_or_default(),
        };
        BackendRepr {
            backend,
            backend_config,
        }
    }
}
