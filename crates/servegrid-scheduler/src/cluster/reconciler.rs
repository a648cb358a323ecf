//! Cluster reconciler: create-or-update the objects of a task.
//!
//! Each object kind is reconciled on its own. A failure on one kind is
//! logged and collected, the remaining kinds are still attempted, and the
//! combined failure is returned at the end.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use servegrid_core::{RuntimeInfo, TaskSpec};

use crate::backend::ResourceBackend;
use crate::cluster::api::{ClusterApi, ObjectKind};
use crate::cluster::objects::{self, ClusterContext};
use crate::error::{SchedulerError, SchedulerResult};

pub struct ClusterReconciler {
    api: Arc<dyn ClusterApi>,
    ctx: ClusterContext,
}

impl ClusterReconciler {
    pub fn new(api: Arc<dyn ClusterApi>, ctx: ClusterContext) -> Self {
        Self { api, ctx }
    }

    /// Create every desired object that is absent and replace every one
    /// that exists. Kinds the spec no longer asks for are deleted.
    /// Applying the same spec twice changes nothing.
    pub async fn create_or_update(&self, spec: &TaskSpec) -> SchedulerResult<()> {
        let namespace = objects::namespace(spec);
        let desired = objects::desired_objects(spec, &self.ctx)?;
        let mut failed = Vec::new();

        for kind in ObjectKind::ALL {
            if desired.iter().any(|(k, _)| *k == kind) {
                continue;
            }
            let name = objects::object_name(kind, spec);
            match self.api.delete(kind, namespace, &name).await {
                Ok(true) => info!(task = %spec.name, %kind, %name, "no longer wanted, deleted"),
                Ok(false) => {}
                Err(e) => {
                    warn!(task = %spec.name, %kind, %name, error = %e, "prune failed");
                    failed.push(kind);
                }
            }
        }

        for (kind, desired) in desired {
            let name = objects::object_name(kind, spec);
            if let Err(e) = self.apply(kind, namespace, &name, desired).await {
                warn!(task = %spec.name, %kind, %name, error = %e, "apply failed");
                failed.push(kind);
            }
        }

        if failed.is_empty() {
            info!(task = %spec.name, %namespace, replicas = spec.replica, "cluster objects applied");
            Ok(())
        } else {
            Err(reconcile_error(spec, &failed))
        }
    }

    async fn apply(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        mut desired: Value,
    ) -> SchedulerResult<()> {
        match self.api.get(kind, namespace, name).await? {
            None => {
                self.api.create(kind, namespace, &desired).await?;
                debug!(%kind, %name, "created");
            }
            Some(live) => {
                if let Some(rv) = live.pointer("/metadata/resourceVersion").cloned()
                    && let Some(meta) = desired.get_mut("metadata").and_then(Value::as_object_mut)
                {
                    meta.insert("resourceVersion".to_string(), rv);
                }
                self.api.replace(kind, namespace, name, &desired).await?;
                debug!(%kind, %name, "replaced");
            }
        }
        Ok(())
    }

    /// Delete every object kind the task could own. Absent objects are
    /// not an error, so this is safe to repeat.
    pub async fn delete(&self, spec: &TaskSpec) -> SchedulerResult<()> {
        let namespace = objects::namespace(spec);
        let mut failed = Vec::new();

        for kind in ObjectKind::ALL {
            let name = objects::object_name(kind, spec);
            match self.api.delete(kind, namespace, &name).await {
                Ok(true) => debug!(%kind, %name, "deleted"),
                Ok(false) => {}
                Err(e) => {
                    warn!(task = %spec.name, %kind, %name, error = %e, "delete failed");
                    failed.push(kind);
                }
            }
        }

        if failed.is_empty() {
            info!(task = %spec.name, %namespace, "cluster objects deleted");
            Ok(())
        } else {
            Err(reconcile_error(spec, &failed))
        }
    }
}

fn reconcile_error(spec: &TaskSpec, failed: &[ObjectKind]) -> SchedulerError {
    let kinds = failed
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    SchedulerError::Reconcile {
        task: spec.name.clone(),
        kinds,
    }
}

#[async_trait]
impl ResourceBackend for ClusterReconciler {
    async fn deploy_task(&self, spec: &TaskSpec) -> SchedulerResult<()> {
        self.create_or_update(spec).await
    }

    async fn delete_task(&self, spec: &TaskSpec) -> SchedulerResult<()> {
        self.delete(spec).await
    }

    /// Judged by the first pod only.
    async fn is_task_running(&self, spec: &TaskSpec) -> SchedulerResult<bool> {
        let pods = self.runtime_infos(spec).await?;
        Ok(pods.first().is_some_and(|p| p.status == "Running"))
    }

    async fn runtime_infos(&self, spec: &TaskSpec) -> SchedulerResult<Vec<RuntimeInfo>> {
        self.api
            .list_pods(objects::namespace(spec), &objects::pod_selector(spec))
            .await
    }
}
