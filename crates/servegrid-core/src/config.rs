//! servegrid.toml configuration parser.
//!
//! Every section falls back to defaults, so an empty file (or no file at
//! all) yields a runnable single-node configuration. A fixed set of
//! `SERVEGRID_*` environment variables override file values.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServegridConfig {
    pub api: ApiConfig,
    pub detector: DetectorConfig,
    pub prometheus: PrometheusConfig,
    pub advisor: AdvisorConfig,
    pub serving: ServingConfig,
    pub state: StateConfig,
    pub queue: QueueConfig,
    pub resource_backend: ResourceBackendConfig,
    pub docker: DockerConfig,
    pub k8s: K8sConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen: SocketAddr,
    pub url_prefix: String,
    pub version: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8183)),
            url_prefix: "/api/servegrid/v1".to_string(),
            version: "v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub detect_interval_secs: u64,
    /// How far back each metrics range query looks.
    pub lookback_secs: u64,
    /// Range query resolution, in Prometheus duration syntax.
    pub step: String,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            detect_interval_secs: 30,
            lookback_secs: 3 * 60 * 60,
            step: "60s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub url: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub url: String,
    pub path_prefix: String,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8181".to_string(),
            path_prefix: "/api/algo/v1".to_string(),
        }
    }
}

/// Defaults applied to every serving replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Prefix of derived exporter service names.
    pub name: String,
    pub image: String,
    pub start_cmd: Vec<String>,
    pub network: String,
    pub network_alias: String,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            name: "servegrid".to_string(),
            image: String::new(),
            start_cmd: vec!["servegrid-serve".to_string(), "run".to_string()],
            network: String::new(),
            network_alias: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/servegrid/state.redb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 1 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceBackendKind {
    #[default]
    Docker,
    K8s,
}

impl std::str::FromStr for ResourceBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(ResourceBackendKind::Docker),
            "k8s" | "kubernetes" => Ok(ResourceBackendKind::K8s),
            other => anyhow::bail!("unknown resource backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceBackendConfig {
    pub kind: ResourceBackendKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Fixed GPU indices; discovered with `nvidia-smi` when absent.
    pub gpu_indices: Option<Vec<u32>>,
    pub stop_timeout_secs: i64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            gpu_indices: None,
            stop_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct K8sConfig {
    pub in_cluster: bool,
    pub kubeconfig_path: Option<PathBuf>,
    pub gpu_resource_name: String,
    pub ingress_class: String,
    pub collector_service_account: String,
}

impl Default for K8sConfig {
    fn default() -> Self {
        Self {
            in_cluster: false,
            kubeconfig_path: None,
            gpu_resource_name: "nvidia.com/gpu".to_string(),
            ingress_class: "nginx".to_string(),
            collector_service_account: "otel-collector".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,servegrid=debug".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl ServegridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: ServegridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from defaults, then apply
    /// environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply `SERVEGRID_*` overrides read through `lookup`.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SERVEGRID_API_LISTEN") {
            self.api.listen = v
                .parse()
                .with_context(|| format!("SERVEGRID_API_LISTEN={v}"))?;
        }
        if let Some(v) = lookup("SERVEGRID_PROMETHEUS_URL") {
            self.prometheus.url = v;
        }
        if let Some(v) = lookup("SERVEGRID_ADVISOR_URL") {
            self.advisor.url = v;
        }
        if let Some(v) = lookup("SERVEGRID_DETECT_INTERVAL_SECS") {
            self.detector.detect_interval_secs = v
                .parse()
                .with_context(|| format!("SERVEGRID_DETECT_INTERVAL_SECS={v}"))?;
        }
        if let Some(v) = lookup("SERVEGRID_RESOURCE_BACKEND") {
            self.resource_backend.kind = v.parse()?;
        }
        if let Some(v) = lookup("SERVEGRID_STATE_PATH") {
            self.state.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SERVEGRID_SERVING_IMAGE") {
            self.serving.image = v;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_empty() {
        let config: ServegridConfig = toml::from_str("").unwrap();
        assert_eq!(config.detector.detect_interval_secs, 30);
        assert_eq!(config.queue.capacity, 1);
        assert_eq!(config.resource_backend.kind, ResourceBackendKind::Docker);
        assert_eq!(config.k8s.gpu_resource_name, "nvidia.com/gpu");
    }

    #[test]
    fn test_parse_sections() {
        let toml_str = r#"
[resource_backend]
kind = "k8s"

[docker]
gpu_indices = [0, 1, 2, 3]

[serving]
image = "registry.local/serve:1.2"
start_cmd = ["python", "-m", "serve"]

[logging]
format = "json"
"#;
        let config: ServegridConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.resource_backend.kind, ResourceBackendKind::K8s);
        assert_eq!(config.docker.gpu_indices, Some(vec![0, 1, 2, 3]));
        assert_eq!(config.serving.start_cmd.len(), 3);
        assert_eq!(config.serving.name, "servegrid");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SERVEGRID_API_LISTEN", "127.0.0.1:9000"),
            ("SERVEGRID_RESOURCE_BACKEND", "kubernetes"),
            ("SERVEGRID_DETECT_INTERVAL_SECS", "5"),
        ]
        .into_iter()
        .collect();

        let mut config = ServegridConfig::default();
        config
            .apply_overrides_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.api.listen.port(), 9000);
        assert_eq!(config.resource_backend.kind, ResourceBackendKind::K8s);
        assert_eq!(config.detector.detect_interval_secs, 5);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = ServegridConfig::default();
        let result = config.apply_overrides_from(|k| {
            (k == "SERVEGRID_DETECT_INTERVAL_SECS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ServegridConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("[detector]"));
        let back: ServegridConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.api.listen, config.api.listen);
    }
}
