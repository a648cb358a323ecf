//! Telemetry collector pipeline configuration.
//!
//! The collector receives OTLP from the serving replicas and scrapes their
//! Prometheus endpoint, tags metrics with the cluster id, strips
//! per-request HTTP attributes, and exports everything to Kafka. The
//! configuration is built as typed values and serialized to JSON, which
//! the collector operator accepts as YAML.

use serde::Serialize;

use servegrid_core::TaskSpec;

pub const KAFKA_TOPIC: &str = "k8s-common-collector";
pub const KAFKA_PROTOCOL_VERSION: &str = "2.0.0";
pub const OTLP_GRPC_PORT: u16 = 4317;
pub const OTLP_HTTP_PORT: u16 = 4318;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectorPipelineConfig {
    pub receivers: Receivers,
    pub processors: Processors,
    pub exporters: Exporters,
    pub service: PipelineService,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receivers {
    pub otlp: OtlpReceiver,
    pub prometheus: PrometheusReceiver,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OtlpReceiver {
    pub protocols: OtlpProtocols,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OtlpProtocols {
    pub grpc: Endpoint,
    pub http: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Endpoint {
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrometheusReceiver {
    pub config: ScrapeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapeConfig {
    pub scrape_configs: Vec<ScrapeJob>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapeJob {
    pub job_name: String,
    pub scrape_interval: String,
    pub static_configs: Vec<StaticTargets>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaticTargets {
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Processors {
    pub batch: BatchProcessor,
    #[serde(rename = "attributes/metrics")]
    pub attributes_metrics: AttributesProcessor,
    #[serde(rename = "attributes/http")]
    pub attributes_http: AttributesProcessor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchProcessor {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributesProcessor {
    pub actions: Vec<AttributeAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeAction {
    pub key: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl AttributeAction {
    fn insert(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            action: "insert".to_string(),
            value: Some(value.to_string()),
        }
    }

    fn delete(key: &str) -> Self {
        Self {
            key: key.to_string(),
            action: "delete".to_string(),
            value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exporters {
    pub kafka: KafkaExporter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KafkaExporter {
    pub brokers: Vec<String>,
    pub topic: String,
    pub protocol_version: String,
    pub auth: KafkaAuth,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KafkaAuth {
    pub sasl: Sasl,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sasl {
    pub username: String,
    pub password: String,
    pub mechanism: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineService {
    pub pipelines: Pipelines,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pipelines {
    pub traces: Pipeline,
    pub metrics: Pipeline,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pipeline {
    pub receivers: Vec<String>,
    pub processors: Vec<String>,
    pub exporters: Vec<String>,
}

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl CollectorPipelineConfig {
    /// Pipeline for one task; `scrape_target` is `host:port` of its service.
    pub fn for_task(spec: &TaskSpec, scrape_target: String) -> Self {
        let kafka = &spec.collector.kafka;
        Self {
            receivers: Receivers {
                otlp: OtlpReceiver {
                    protocols: OtlpProtocols {
                        grpc: Endpoint {
                            endpoint: format!("0.0.0.0:{OTLP_GRPC_PORT}"),
                        },
                        http: Endpoint {
                            endpoint: format!("0.0.0.0:{OTLP_HTTP_PORT}"),
                        },
                    },
                },
                prometheus: PrometheusReceiver {
                    config: ScrapeConfig {
                        scrape_configs: vec![ScrapeJob {
                            job_name: spec.name.clone(),
                            scrape_interval: "5s".to_string(),
                            static_configs: vec![StaticTargets {
                                targets: vec![scrape_target],
                            }],
                        }],
                    },
                },
            },
            processors: Processors {
                batch: BatchProcessor {},
                attributes_metrics: AttributesProcessor {
                    actions: vec![AttributeAction::insert(
                        "cluster_id",
                        &spec.collector.cluster_id,
                    )],
                },
                attributes_http: AttributesProcessor {
                    actions: vec![
                        AttributeAction::delete("http.server_name"),
                        AttributeAction::delete("http.host"),
                    ],
                },
            },
            exporters: Exporters {
                kafka: KafkaExporter {
                    brokers: kafka.brokers.clone(),
                    topic: KAFKA_TOPIC.to_string(),
                    protocol_version: KAFKA_PROTOCOL_VERSION.to_string(),
                    auth: KafkaAuth {
                        sasl: Sasl {
                            username: kafka.username.clone(),
                            password: kafka.password.clone(),
                            mechanism: "PLAIN".to_string(),
                        },
                    },
                },
            },
            service: PipelineService {
                pipelines: Pipelines {
                    traces: Pipeline {
                        receivers: names(&["otlp"]),
                        processors: names(&["batch"]),
                        exporters: names(&["kafka"]),
                    },
                    metrics: Pipeline {
                        receivers: names(&["prometheus", "otlp"]),
                        processors: names(&["attributes/metrics", "attributes/http", "batch"]),
                        exporters: names(&["kafka"]),
                    },
                },
            },
        }
    }

    pub fn to_config_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
