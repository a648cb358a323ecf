//! Desired cluster objects, rebuilt from the spec on every reconcile.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, HTTPGetAction, HostPathVolumeSource,
    PodSpec, PodTemplateSpec, Probe, ResourceRequirements, Service, ServicePort, ServiceSpec,
    Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::{Value, json};
use tracing::warn;

use servegrid_core::config::{K8sConfig, ServingConfig};
use servegrid_core::{TaskSpec, build_launch_command};

use crate::cluster::api::ObjectKind;
use crate::cluster::collector::{CollectorPipelineConfig, OTLP_HTTP_PORT};
use crate::error::{SchedulerError, SchedulerResult};

/// Label carried by every object and pod of a task.
pub const TASK_LABEL: &str = "servegrid.io/task-name";

const SHM_VOLUME: &str = "dshm";
const HEALTH_CHECK_PATH: &str = "/metrics";
/// Failed health checks tolerated before restart; model loading can take minutes.
const HEALTH_CHECK_FAILURE_THRESHOLD: i32 = 60;

/// Cluster-wide settings that shape every task's objects.
#[derive(Debug, Clone)]
pub struct ClusterContext {
    pub default_image: String,
    pub start_cmd: Vec<String>,
    pub gpu_resource_name: String,
    pub ingress_class: String,
    pub collector_service_account: String,
}

impl ClusterContext {
    pub fn from_config(serving: &ServingConfig, k8s: &K8sConfig) -> Self {
        Self {
            default_image: serving.image.clone(),
            start_cmd: serving.start_cmd.clone(),
            gpu_resource_name: k8s.gpu_resource_name.clone(),
            ingress_class: k8s.ingress_class.clone(),
            collector_service_account: k8s.collector_service_account.clone(),
        }
    }
}

pub fn namespace(spec: &TaskSpec) -> &str {
    if spec.namespace.is_empty() {
        "default"
    } else {
        &spec.namespace
    }
}

pub fn labels(spec: &TaskSpec) -> BTreeMap<String, String> {
    BTreeMap::from([(TASK_LABEL.to_string(), spec.name.clone())])
}

pub fn pod_selector(spec: &TaskSpec) -> String {
    format!("{TASK_LABEL}={}", spec.name)
}

/// Name of each object kind for a task.
pub fn object_name(kind: ObjectKind, spec: &TaskSpec) -> String {
    match kind {
        ObjectKind::Deployment | ObjectKind::Collector => spec.name.clone(),
        ObjectKind::Service if !spec.service.name.is_empty() => spec.service.name.clone(),
        ObjectKind::Service => spec.name.clone(),
        ObjectKind::Ingress if !spec.ingress.name.is_empty() => spec.ingress.name.clone(),
        ObjectKind::Ingress => format!("{}-ingress", spec.name),
    }
}

fn metadata(kind: ObjectKind, spec: &TaskSpec) -> ObjectMeta {
    ObjectMeta {
        name: Some(object_name(kind, spec)),
        namespace: Some(namespace(spec).to_string()),
        labels: Some(labels(spec)),
        ..Default::default()
    }
}

/// Replicas send OTLP to the task's own collector service.
pub fn collector_endpoint(spec: &TaskSpec) -> String {
    format!("{}-collector:{OTLP_HTTP_PORT}", spec.name)
}

pub fn deployment(spec: &TaskSpec, ctx: &ClusterContext) -> SchedulerResult<Deployment> {
    let replicas = i32::try_from(spec.replica).map_err(|_| {
        SchedulerError::InvalidTask(format!(
            "task {} asks for {} replicas, more than a deployment holds",
            spec.name, spec.replica
        ))
    })?;
    let cmd = build_launch_command(
        spec,
        &ctx.start_cmd,
        &spec.exporter_service_name,
        &collector_endpoint(spec),
    );
    let (command, args) = if ctx.start_cmd.is_empty() {
        (None, Some(cmd))
    } else {
        (Some(cmd[..1].to_vec()), Some(cmd[1..].to_vec()))
    };

    let mut volumes = vec![Volume {
        name: SHM_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource {
            medium: Some("Memory".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: SHM_VOLUME.to_string(),
        mount_path: "/dev/shm".to_string(),
        ..Default::default()
    }];
    for (i, v) in spec.volumes.iter().enumerate() {
        let name = format!("hostpath{i}");
        volumes.push(Volume {
            name: name.clone(),
            host_path: Some(HostPathVolumeSource {
                path: v.host_path.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name,
            mount_path: v.mount_path.clone(),
            ..Default::default()
        });
    }

    let gpus = if spec.resources.gpu.is_empty() {
        spec.preferred_gpu_count().to_string()
    } else {
        spec.resources.gpu.clone()
    };
    let gpu_quantity = BTreeMap::from([(ctx.gpu_resource_name.clone(), Quantity(gpus))]);

    let health_check = Probe {
        http_get: Some(HTTPGetAction {
            path: Some(HEALTH_CHECK_PATH.to_string()),
            port: IntOrString::Int(i32::from(spec.port)),
            ..Default::default()
        }),
        initial_delay_seconds: Some(30),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(HEALTH_CHECK_FAILURE_THRESHOLD),
        ..Default::default()
    };

    let image = if spec.image.is_empty() {
        ctx.default_image.clone()
    } else {
        spec.image.clone()
    };

    let container = Container {
        name: spec.name.clone(),
        image: Some(image),
        command,
        args,
        ports: Some(vec![ContainerPort {
            container_port: i32::from(spec.port),
            ..Default::default()
        }]),
        env: Some(
            spec.envs
                .iter()
                .map(|e| EnvVar {
                    name: e.name.clone(),
                    value: Some(e.value.clone()),
                    ..Default::default()
                })
                .collect(),
        ),
        volume_mounts: Some(mounts),
        resources: Some(ResourceRequirements {
            requests: Some(gpu_quantity.clone()),
            limits: Some(gpu_quantity),
            ..Default::default()
        }),
        liveness_probe: Some(health_check.clone()),
        readiness_probe: Some(health_check),
        ..Default::default()
    };

    Ok(Deployment {
        metadata: metadata(ObjectKind::Deployment, spec),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels(spec)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(spec)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    node_selector: (!spec.node_selector.is_empty())
                        .then(|| spec.node_selector.clone()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// `None` when the task declares no ports.
pub fn service(spec: &TaskSpec) -> Option<Service> {
    if spec.service.ports.is_empty() {
        return None;
    }
    let ports = spec
        .service
        .ports
        .iter()
        .enumerate()
        .map(|(i, p)| ServicePort {
            name: Some(format!("tcp{i}")),
            port: p.number,
            target_port: Some(IntOrString::Int(p.number)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect();
    Some(Service {
        metadata: metadata(ObjectKind::Service, spec),
        spec: Some(ServiceSpec {
            selector: Some(labels(spec)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// `None` when the task declares no ingress paths.
pub fn ingress(spec: &TaskSpec, ctx: &ClusterContext) -> Option<Ingress> {
    if spec.ingress.paths.is_empty() {
        return None;
    }
    let paths = spec
        .ingress
        .paths
        .iter()
        .map(|p| HTTPIngressPath {
            path: Some(p.path.clone()),
            path_type: "Prefix".to_string(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend {
                    name: p.backend.service.name.clone(),
                    port: Some(ServiceBackendPort {
                        number: Some(p.backend.service.port.number),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            },
        })
        .collect();
    Some(Ingress {
        metadata: metadata(ObjectKind::Ingress, spec),
        spec: Some(IngressSpec {
            ingress_class_name: Some(ctx.ingress_class.clone()),
            rules: Some(vec![IngressRule {
                http: Some(HTTPIngressRuleValue { paths }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Collector custom resource, or `None` when telemetry is disabled.
///
/// The collector scrapes the task's Service, so a task without one gets
/// no collector either.
pub fn collector(spec: &TaskSpec, ctx: &ClusterContext) -> SchedulerResult<Option<Value>> {
    if !spec.collector.enable {
        return Ok(None);
    }
    let Some(target_port) = spec.service.ports.first().map(|p| p.number) else {
        warn!(task = %spec.name, "collector enabled without service ports, skipped");
        return Ok(None);
    };
    let target = format!(
        "{}.{}.svc:{target_port}",
        object_name(ObjectKind::Service, spec),
        namespace(spec)
    );
    let config = CollectorPipelineConfig::for_task(spec, target).to_config_string()?;
    let kind = ObjectKind::Collector;
    Ok(Some(json!({
        "apiVersion": kind.api_version(),
        "kind": kind.kind(),
        "metadata": {
            "name": object_name(kind, spec),
            "namespace": namespace(spec),
            "labels": labels(spec),
        },
        "spec": {
            "mode": "deployment",
            "serviceAccount": ctx.collector_service_account,
            "config": config,
        },
    })))
}

/// Every object the task should have, as manifests.
pub fn desired_objects(
    spec: &TaskSpec,
    ctx: &ClusterContext,
) -> SchedulerResult<Vec<(ObjectKind, Value)>> {
    let mut objects = vec![(
        ObjectKind::Deployment,
        serde_json::to_value(deployment(spec, ctx)?)?,
    )];
    if let Some(svc) = service(spec) {
        objects.push((ObjectKind::Service, serde_json::to_value(svc)?));
    }
    if let Some(ing) = ingress(spec, ctx) {
        objects.push((ObjectKind::Ingress, serde_json::to_value(ing)?));
    }
    if let Some(col) = collector(spec, ctx)? {
        objects.push((ObjectKind::Collector, col));
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use servegrid_core::{
        CollectorConfig, IngressBackend as SpecIngressBackend, IngressConfig, IngressPath,
        IngressServiceRef, PortNumber, ServiceConfig, VolumeMount as SpecVolume,
    };

    fn ctx() -> ClusterContext {
        ClusterContext {
            default_image: "serve:1".into(),
            start_cmd: vec!["serve".into(), "run".into()],
            gpu_resource_name: "nvidia.com/gpu".into(),
            ingress_class: "nginx".into(),
            collector_service_account: "otel-collector".into(),
        }
    }

    fn test_spec() -> TaskSpec {
        TaskSpec {
            name: "llama".into(),
            model: "m".into(),
            port: 9199,
            replica: 3,
            namespace: "serving".into(),
            exporter_service_name: "llama-svc".into(),
            volumes: vec![SpecVolume {
                mount_path: "/model".into(),
                host_path: "/mnt/model".into(),
            }],
            node_selector: BTreeMap::from([("gpu".to_string(), "a100".to_string())]),
            ..Default::default()
        }
    }

    #[test]
    fn test_deployment_translation() {
        let d = deployment(&test_spec(), &ctx()).unwrap();
        let spec = d.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.node_selector.unwrap()["gpu"], "a100");
        let volumes = pod.volumes.unwrap();
        assert_eq!(volumes[0].name, SHM_VOLUME);
        assert_eq!(volumes[1].name, "hostpath0");

        let c = &pod.containers[0];
        assert_eq!(c.image.as_deref(), Some("serve:1"));
        assert_eq!(c.command.as_deref(), Some(&["serve".to_string()][..]));
        let args = c.args.as_ref().unwrap().join(" ");
        assert!(args.starts_with("run --model m"));
        assert!(args.contains("--exporter_endpoint llama-collector:4318"));
        assert!(args.contains("--exporter_service_name llama-svc"));

        let limits = c.resources.as_ref().unwrap().limits.as_ref().unwrap();
        assert_eq!(limits["nvidia.com/gpu"], Quantity("1".into()));
        let check = c.liveness_probe.as_ref().unwrap();
        assert_eq!(check.failure_threshold, Some(HEALTH_CHECK_FAILURE_THRESHOLD));
        assert_eq!(
            c.volume_mounts.as_ref().unwrap()[0].mount_path,
            "/dev/shm"
        );
    }

    #[test]
    fn test_deployment_serializes_type_meta() {
        let value = serde_json::to_value(deployment(&test_spec(), &ctx()).unwrap()).unwrap();
        assert_eq!(value["apiVersion"], "apps/v1");
        assert_eq!(value["kind"], "Deployment");
        assert_eq!(value["metadata"]["labels"][TASK_LABEL], "llama");
    }

    #[test]
    fn test_optional_objects_skipped() {
        let spec = test_spec();
        assert!(service(&spec).is_none());
        assert!(ingress(&spec, &ctx()).is_none());
        assert!(collector(&spec, &ctx()).unwrap().is_none());
        assert_eq!(desired_objects(&spec, &ctx()).unwrap().len(), 1);
    }

    #[test]
    fn test_collector_needs_service() {
        let mut spec = test_spec();
        spec.collector.enable = true;
        assert!(collector(&spec, &ctx()).unwrap().is_none());
    }

    #[test]
    fn test_replica_count_out_of_range() {
        let mut spec = test_spec();
        spec.replica = u32::MAX;
        let err = deployment(&spec, &ctx()).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTask(_)));
        assert!(desired_objects(&spec, &ctx()).is_err());
    }

    #[test]
    fn test_service_ingress_and_collector() {
        let mut spec = test_spec();
        spec.service = ServiceConfig {
            name: "llama-http".into(),
            ports: vec![PortNumber { number: 9199 }],
        };
        spec.ingress = IngressConfig {
            name: String::new(),
            paths: vec![IngressPath {
                path: "/llama".into(),
                backend: SpecIngressBackend {
                    service: IngressServiceRef {
                        name: "llama-http".into(),
                        port: PortNumber { number: 9199 },
                    },
                },
            }],
        };
        spec.collector = CollectorConfig {
            enable: true,
            ..Default::default()
        };

        let svc = service(&spec).unwrap();
        assert_eq!(svc.metadata.name.as_deref(), Some("llama-http"));
        let ports = svc.spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].port, 9199);

        let ing = ingress(&spec, &ctx()).unwrap();
        assert_eq!(ing.metadata.name.as_deref(), Some("llama-ingress"));
        let ing_spec = ing.spec.unwrap();
        assert_eq!(ing_spec.ingress_class_name.as_deref(), Some("nginx"));

        let col = collector(&spec, &ctx()).unwrap().unwrap();
        assert_eq!(col["kind"], "OpenTelemetryCollector");
        assert_eq!(col["spec"]["serviceAccount"], "otel-collector");
        let config = col["spec"]["config"].as_str().unwrap();
        assert!(config.contains("llama-http.serving.svc:9199"));

        let kinds: Vec<ObjectKind> = desired_objects(&spec, &ctx())
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(kinds, ObjectKind::ALL.to_vec());
    }
}
