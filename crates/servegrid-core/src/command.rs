//! Launch command composition for serving replicas.

use crate::types::TaskSpec;

/// Build the full argv for one replica.
///
/// Both resource backends use this; they differ only in the exporter
/// identity and endpoint they pass in. Extra launch arguments are emitted
/// in key order so the result is stable across reconciliations.
pub fn build_launch_command(
    spec: &TaskSpec,
    start_cmd: &[String],
    exporter_service_name: &str,
    exporter_endpoint: &str,
) -> Vec<String> {
    let mut cmd: Vec<String> = start_cmd.to_vec();
    cmd.extend([
        "--model".to_string(),
        spec.model.clone(),
        "--port".to_string(),
        spec.port.to_string(),
        "--host".to_string(),
        spec.host.clone(),
        "--backend".to_string(),
        spec.backend.kind().to_string(),
        "--exporter_service_name".to_string(),
        exporter_service_name.to_string(),
        "--exporter_endpoint".to_string(),
        exporter_endpoint.to_string(),
    ]);
    cmd.extend(spec.backend.launch_args());
    for (key, value) in &spec.backend_extra_config {
        cmd.push(format!("--{key}"));
        cmd.push(value.clone());
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendConfig, VllmBackendConfig};

    #[test]
    fn test_command_layout() {
        let mut spec = TaskSpec {
            name: "t".into(),
            model: "m".into(),
            host: "0.0.0.0".into(),
            port: 9199,
            backend: BackendConfig::Vllm(VllmBackendConfig {
                tensor_parallel_size: 2,
                ..Default::default()
            }),
            ..Default::default()
        };
        spec.backend_extra_config.insert("z_flag".into(), "1".into());
        spec.backend_extra_config.insert("dtype".into(), "half".into());

        let start = vec!["serve".to_string(), "run".to_string()];
        let cmd = build_launch_command(&spec, &start, "svc-replica-ab12", "otel:4318");

        assert_eq!(&cmd[..2], &["serve", "run"]);
        let joined = cmd.join(" ");
        assert!(joined.contains("--model m --port 9199 --host 0.0.0.0 --backend vllm"));
        assert!(joined.contains("--exporter_service_name svc-replica-ab12"));
        assert!(joined.contains("--exporter_endpoint otel:4318"));
        assert!(joined.contains("--tensor_parallel_size 2"));
        assert!(!joined.contains("--max_num_seqs"));
        assert!(joined.ends_with("--dtype half --z_flag 1"));
    }
}
