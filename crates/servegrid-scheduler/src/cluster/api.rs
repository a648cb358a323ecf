//! Cluster API seam.
//!
//! Objects travel as JSON manifests so one trait covers built-in kinds and
//! the collector custom resource alike.

use async_trait::async_trait;
use serde_json::Value;

use servegrid_core::RuntimeInfo;

use crate::error::SchedulerResult;

/// The object kinds a task is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Deployment,
    Service,
    Ingress,
    Collector,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 4] = [
        ObjectKind::Deployment,
        ObjectKind::Service,
        ObjectKind::Ingress,
        ObjectKind::Collector,
    ];

    pub fn group(&self) -> &'static str {
        match self {
            ObjectKind::Deployment => "apps",
            ObjectKind::Service => "",
            ObjectKind::Ingress => "networking.k8s.io",
            ObjectKind::Collector => "opentelemetry.io",
        }
    }

    pub fn version(&self) -> &'static str {
        match self {
            ObjectKind::Deployment | ObjectKind::Service | ObjectKind::Ingress => "v1",
            ObjectKind::Collector => "v1alpha1",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ObjectKind::Deployment => "Deployment",
            ObjectKind::Service => "Service",
            ObjectKind::Ingress => "Ingress",
            ObjectKind::Collector => "OpenTelemetryCollector",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ObjectKind::Deployment => "deployments",
            ObjectKind::Service => "services",
            ObjectKind::Ingress => "ingresses",
            ObjectKind::Collector => "opentelemetrycollectors",
        }
    }

    pub fn api_version(&self) -> String {
        if self.group().is_empty() {
            self.version().to_string()
        } else {
            format!("{}/{}", self.group(), self.version())
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get(&self, kind: ObjectKind, namespace: &str, name: &str) -> SchedulerResult<Option<Value>>;

    async fn create(&self, kind: ObjectKind, namespace: &str, object: &Value) -> SchedulerResult<()>;

    /// Full replace; `object` must carry the live `resourceVersion`.
    async fn replace(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        object: &Value,
    ) -> SchedulerResult<()>;

    /// Returns `false` when the object did not exist.
    async fn delete(&self, kind: ObjectKind, namespace: &str, name: &str) -> SchedulerResult<bool>;

    /// Pods matching a label selector, in API order.
    async fn list_pods(&self, namespace: &str, selector: &str) -> SchedulerResult<Vec<RuntimeInfo>>;
}
