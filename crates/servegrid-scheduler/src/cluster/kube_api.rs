//! `ClusterApi` over a live Kubernetes API server.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::Value;
use tracing::{debug, info};

use servegrid_core::RuntimeInfo;
use servegrid_core::config::K8sConfig;

use crate::cluster::api::{ClusterApi, ObjectKind};
use crate::error::{SchedulerError, SchedulerResult};

#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from in-cluster credentials, an explicit kubeconfig,
    /// or the usual inference chain, in that order of preference.
    pub async fn connect(cfg: &K8sConfig) -> SchedulerResult<Self> {
        let config = if cfg.in_cluster {
            Config::incluster().map_err(|e| SchedulerError::Cluster(e.to_string()))?
        } else if let Some(path) = &cfg.kubeconfig_path {
            let kubeconfig =
                Kubeconfig::read_from(path).map_err(|e| SchedulerError::Cluster(e.to_string()))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| SchedulerError::Cluster(e.to_string()))?
        } else {
            Config::infer()
                .await
                .map_err(|e| SchedulerError::Cluster(e.to_string()))?
        };
        info!(cluster_url = %config.cluster_url, "kubernetes client configured");
        Ok(Self::new(Client::try_from(config)?))
    }

    fn api(&self, kind: ObjectKind, namespace: &str) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(kind.group(), kind.version(), kind.kind());
        let resource = ApiResource::from_gvk_with_plural(&gvk, kind.plural());
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 404)
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get(&self, kind: ObjectKind, namespace: &str, name: &str) -> SchedulerResult<Option<Value>> {
        match self.api(kind, namespace).get_opt(name).await? {
            Some(obj) => Ok(Some(serde_json::to_value(obj)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, kind: ObjectKind, namespace: &str, object: &Value) -> SchedulerResult<()> {
        let obj: DynamicObject = serde_json::from_value(object.clone())?;
        self.api(kind, namespace)
            .create(&PostParams::default(), &obj)
            .await?;
        Ok(())
    }

    async fn replace(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        object: &Value,
    ) -> SchedulerResult<()> {
        let obj: DynamicObject = serde_json::from_value(object.clone())?;
        self.api(kind, namespace)
            .replace(name, &PostParams::default(), &obj)
            .await?;
        Ok(())
    }

    async fn delete(&self, kind: ObjectKind, namespace: &str, name: &str) -> SchedulerResult<bool> {
        match self
            .api(kind, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => {
                debug!(%kind, %namespace, %name, "already absent");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> SchedulerResult<Vec<RuntimeInfo>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default().labels(selector)).await?;
        Ok(list
            .items
            .into_iter()
            .map(|pod| RuntimeInfo {
                id: pod.metadata.uid.unwrap_or_default(),
                name: pod.metadata.name.unwrap_or_default(),
                status: pod
                    .status
                    .and_then(|s| s.phase)
                    .unwrap_or_else(|| "Unknown".to_string()),
            })
            .collect())
    }
}
