//! Cluster backend: replicas as a Kubernetes Deployment plus its Service,
//! Ingress and telemetry collector.

pub mod api;
pub mod collector;
pub mod kube_api;
pub mod objects;
pub mod reconciler;

pub use api::{ClusterApi, ObjectKind};
pub use kube_api::KubeClusterApi;
pub use objects::ClusterContext;
pub use reconciler::ClusterReconciler;
