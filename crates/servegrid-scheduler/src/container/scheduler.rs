//! ContainerPoolScheduler: replica reconciliation on a single host.
//!
//! For each task the scheduler keeps the ordered list of container ids in
//! the state store and, in memory, which GPU indices each container holds.
//! A reconcile compares the recorded count with `spec.replica`:
//!
//! ```text
//! no record      → launch `replica` containers
//! replica == 0   → stop all, release their GPUs, drop the record
//! count > replica→ stop the oldest `count - replica`
//! count < replica→ launch `replica - count` more
//! ```
//!
//! Pool and assignments live behind one mutex held for the whole
//! reconcile, so the number of in-use GPUs always equals the GPUs
//! assigned to live containers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use servegrid_core::config::ServingConfig;
use servegrid_core::{RuntimeInfo, TaskSpec, build_launch_command};
use servegrid_state::StateStore;

use crate::backend::ResourceBackend;
use crate::container::engine::{ContainerEngine, ContainerLaunch};
use crate::container::gpu::GpuPool;
use crate::error::{SchedulerError, SchedulerResult};

struct PoolState {
    gpus: GpuPool,
    /// container id → GPU indices it holds.
    assignments: HashMap<String, Vec<u32>>,
}

impl PoolState {
    fn release_container(&mut self, id: &str) {
        if let Some(gpus) = self.assignments.remove(id) {
            self.gpus.release(&gpus);
        }
    }
}

pub struct ContainerPoolScheduler {
    engine: Arc<dyn ContainerEngine>,
    store: StateStore,
    serving: ServingConfig,
    pool: Mutex<PoolState>,
}

impl ContainerPoolScheduler {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        store: StateStore,
        serving: ServingConfig,
        gpu_indices: impl IntoIterator<Item = u32>,
    ) -> Self {
        Self {
            engine,
            store,
            serving,
            pool: Mutex::new(PoolState {
                gpus: GpuPool::new(gpu_indices),
                assignments: HashMap::new(),
            }),
        }
    }

    /// Number of GPUs currently marked in use.
    pub async fn gpus_in_use(&self) -> usize {
        self.pool.lock().await.gpus.in_use()
    }

    /// Total GPUs held by live containers, summed over assignments.
    pub async fn gpus_assigned(&self) -> usize {
        self.pool
            .lock()
            .await
            .assignments
            .values()
            .map(Vec::len)
            .sum()
    }

    /// GPU indices held by one container.
    pub async fn container_gpus(&self, id: &str) -> Option<Vec<u32>> {
        self.pool.lock().await.assignments.get(id).cloned()
    }

    async fn reconcile(&self, spec: &TaskSpec) -> SchedulerResult<()> {
        let mut pool = self.pool.lock().await;
        let desired = spec.replica as usize;

        let Some(mut ids) = self.store.get_container_ids(&spec.name)? else {
            if desired == 0 {
                return Ok(());
            }
            let (ids, failed) = self.launch_many(&mut pool, spec, desired).await?;
            self.store.put_container_ids(&spec.name, &ids)?;
            info!(task = %spec.name, replicas = ids.len(), "task deployed");
            return check_failures(&spec.name, "start", failed, desired);
        };

        let current = ids.len();
        if desired == 0 {
            let kept = self.stop_many(&mut pool, &spec.name, ids).await;
            let failed = kept.len();
            if kept.is_empty() {
                self.store.delete_container_ids(&spec.name)?;
            } else {
                self.store.put_container_ids(&spec.name, &kept)?;
            }
            info!(task = %spec.name, from = current, "task scaled to zero");
            return check_failures(&spec.name, "stop", failed, current);
        }

        if current > desired {
            let excess = current - desired;
            let survivors = ids.split_off(excess);
            let mut kept = self.stop_many(&mut pool, &spec.name, ids).await;
            let failed = kept.len();
            kept.extend(survivors);
            self.store.put_container_ids(&spec.name, &kept)?;
            info!(task = %spec.name, from = current, to = kept.len(), "scaled down");
            return check_failures(&spec.name, "stop", failed, excess);
        }

        if current < desired {
            let missing = desired - current;
            let (new_ids, failed) = self.launch_many(&mut pool, spec, missing).await?;
            ids.extend(new_ids);
            self.store.put_container_ids(&spec.name, &ids)?;
            info!(task = %spec.name, from = current, to = ids.len(), "scaled up");
            return check_failures(&spec.name, "start", failed, missing);
        }

        debug!(task = %spec.name, replicas = current, "replica count already matches");
        Ok(())
    }

    /// Launch `count` replicas. Returns the ids that started and how many
    /// attempts failed.
    async fn launch_many(
        &self,
        pool: &mut PoolState,
        spec: &TaskSpec,
        count: usize,
    ) -> SchedulerResult<(Vec<String>, usize)> {
        let image = if spec.image.is_empty() {
            self.serving.image.clone()
        } else {
            spec.image.clone()
        };
        self.engine.ensure_image(&image).await?;

        let mut ids = Vec::with_capacity(count);
        let mut failed = 0;
        for _ in 0..count {
            match self.launch_one(pool, spec, &image).await {
                Ok(id) => ids.push(id),
                Err(e) => {
                    warn!(task = %spec.name, error = %e, "replica failed to start");
                    failed += 1;
                }
            }
        }
        Ok((ids, failed))
    }

    async fn launch_one(
        &self,
        pool: &mut PoolState,
        spec: &TaskSpec,
        image: &str,
    ) -> SchedulerResult<String> {
        let want = spec.preferred_gpu_count() as usize;
        let gpus = pool.gpus.allocate(want);
        if gpus.len() < want {
            warn!(
                task = %spec.name,
                want,
                got = gpus.len(),
                "not enough free gpus, launching with what is available"
            );
        }

        let name = replica_name(spec);
        let launch = ContainerLaunch {
            cmd: build_launch_command(
                spec,
                &self.serving.start_cmd,
                &name,
                &spec.exporter_endpoint,
            ),
            name,
            image: image.to_string(),
            env: spec
                .envs
                .iter()
                .map(|e| format!("{}={}", e.name, e.value))
                .collect(),
            binds: spec
                .volumes
                .iter()
                .map(|v| format!("{}:{}", v.host_path, v.mount_path))
                .collect(),
            port: spec.port,
            gpu_ids: gpus.iter().map(u32::to_string).collect(),
            network: self.serving.network.clone(),
            network_alias: self.serving.network_alias.clone(),
        };

        let id = match self.engine.create(&launch).await {
            Ok(id) => id,
            Err(e) => {
                pool.gpus.release(&gpus);
                return Err(e);
            }
        };
        if let Err(e) = self.engine.start(&id).await {
            // Created but never started: remove it, it is not recorded anywhere.
            if let Err(cleanup) = self.engine.stop_and_remove(&id).await {
                warn!(task = %spec.name, container = %id, error = %cleanup, "failed to remove unstarted replica");
            }
            pool.gpus.release(&gpus);
            return Err(e);
        }
        pool.assignments.insert(id.clone(), gpus);
        Ok(id)
    }

    /// Stop containers in order. Returns the ids that could not be stopped.
    async fn stop_many(&self, pool: &mut PoolState, task: &str, ids: Vec<String>) -> Vec<String> {
        let mut kept = Vec::new();
        for id in ids {
            match self.engine.stop_and_remove(&id).await {
                Ok(()) => pool.release_container(&id),
                Err(e) => {
                    warn!(%task, container = %id, error = %e, "failed to stop replica");
                    kept.push(id);
                }
            }
        }
        kept
    }
}

/// `{exporter_service_name}-replica-{4 hex chars}`.
fn replica_name(spec: &TaskSpec) -> String {
    let base = if spec.exporter_service_name.is_empty() {
        &spec.name
    } else {
        &spec.exporter_service_name
    };
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{base}-replica-{}", &suffix[..4])
}

fn check_failures(task: &str, action: &str, failed: usize, attempted: usize) -> SchedulerResult<()> {
    if failed == 0 {
        Ok(())
    } else {
        Err(SchedulerError::Engine(format!(
            "{task}: {failed} of {attempted} replicas failed to {action}"
        )))
    }
}

#[async_trait]
impl ResourceBackend for ContainerPoolScheduler {
    async fn deploy_task(&self, spec: &TaskSpec) -> SchedulerResult<()> {
        self.reconcile(spec).await
    }

    async fn delete_task(&self, spec: &TaskSpec) -> SchedulerResult<()> {
        let mut teardown = spec.clone();
        teardown.replica = 0;
        self.reconcile(&teardown).await
    }

    async fn is_task_running(&self, spec: &TaskSpec) -> SchedulerResult<bool> {
        Ok(self
            .runtime_infos(spec)
            .await?
            .iter()
            .any(RuntimeInfo::is_running))
    }

    async fn runtime_infos(&self, spec: &TaskSpec) -> SchedulerResult<Vec<RuntimeInfo>> {
        let ids = self.store.get_container_ids(&spec.name)?.unwrap_or_default();
        let mut infos = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(info) = self.engine.inspect(&id).await? {
                infos.push(info);
            }
        }
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use servegrid_core::{BackendConfig, VllmBackendConfig};

    /// In-memory engine: containers are ids mapped to status strings.
    #[derive(Default)]
    struct FakeEngine {
        next_id: AtomicUsize,
        containers: StdMutex<Vec<(String, ContainerLaunch, String)>>,
        fail_launches: AtomicUsize,
        fail_starts: AtomicUsize,
        pulled: StdMutex<Vec<String>>,
    }

    impl FakeEngine {
        fn live(&self) -> usize {
            self.containers.lock().unwrap().len()
        }

        fn set_status(&self, status: &str) {
            for c in self.containers.lock().unwrap().iter_mut() {
                c.2 = status.to_string();
            }
        }
    }

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        async fn ensure_image(&self, image: &str) -> SchedulerResult<()> {
            self.pulled.lock().unwrap().push(image.to_string());
            Ok(())
        }

        async fn create(&self, launch: &ContainerLaunch) -> SchedulerResult<String> {
            if self.fail_launches.load(Ordering::SeqCst) > 0 {
                self.fail_launches.fetch_sub(1, Ordering::SeqCst);
                return Err(SchedulerError::Engine("no space left on device".into()));
            }
            let mut containers = self.containers.lock().unwrap();
            if containers.iter().any(|c| c.1.name == launch.name) {
                return Err(SchedulerError::Engine(format!("name {} in use", launch.name)));
            }
            let id = format!("c{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            containers.push((id.clone(), launch.clone(), "created".into()));
            Ok(id)
        }

        async fn start(&self, id: &str) -> SchedulerResult<()> {
            if self.fail_starts.load(Ordering::SeqCst) > 0 {
                self.fail_starts.fetch_sub(1, Ordering::SeqCst);
                return Err(SchedulerError::Engine("could not select device driver".into()));
            }
            for c in self.containers.lock().unwrap().iter_mut() {
                if c.0 == id {
                    c.2 = "running".into();
                }
            }
            Ok(())
        }

        async fn stop_and_remove(&self, id: &str) -> SchedulerResult<()> {
            self.containers.lock().unwrap().retain(|c| c.0 != id);
            Ok(())
        }

        async fn inspect(&self, id: &str) -> SchedulerResult<Option<RuntimeInfo>> {
            Ok(self
                .containers
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.0 == id)
                .map(|c| RuntimeInfo {
                    id: c.0.clone(),
                    name: c.1.name.clone(),
                    status: c.2.clone(),
                }))
        }
    }

    fn test_spec(name: &str, replica: u32, tp: u32) -> TaskSpec {
        TaskSpec {
            name: name.into(),
            model: "m".into(),
            port: 9199,
            exporter_service_name: format!("{name}-svc"),
            exporter_endpoint: "otel:4318".into(),
            replica,
            backend: BackendConfig::Vllm(VllmBackendConfig {
                tensor_parallel_size: tp,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn scheduler(engine: Arc<FakeEngine>, gpus: u32) -> ContainerPoolScheduler {
        let serving = ServingConfig {
            image: "serve:latest".into(),
            ..Default::default()
        };
        ContainerPoolScheduler::new(
            engine,
            StateStore::open_in_memory().unwrap(),
            serving,
            0..gpus,
        )
    }

    async fn assert_conserved(s: &ContainerPoolScheduler) {
        assert_eq!(s.gpus_in_use().await, s.gpus_assigned().await);
    }

    #[tokio::test]
    async fn test_initial_deploy_creates_replicas() {
        let engine = Arc::new(FakeEngine::default());
        let s = scheduler(engine.clone(), 8);

        s.deploy_task(&test_spec("t", 2, 2)).await.unwrap();
        assert_eq!(engine.live(), 2);
        assert_eq!(s.gpus_in_use().await, 4);
        assert_eq!(engine.pulled.lock().unwrap().as_slice(), ["serve:latest"]);
        assert_eq!(s.store.get_container_ids("t").unwrap().unwrap().len(), 2);
        assert_conserved(&s).await;
    }

    #[tokio::test]
    async fn test_scale_up_two_to_five() {
        let engine = Arc::new(FakeEngine::default());
        let s = scheduler(engine.clone(), 8);

        s.deploy_task(&test_spec("t", 2, 1)).await.unwrap();
        let before = s.store.get_container_ids("t").unwrap().unwrap();

        s.deploy_task(&test_spec("t", 5, 1)).await.unwrap();
        let after = s.store.get_container_ids("t").unwrap().unwrap();

        assert_eq!(after.len(), 5);
        assert_eq!(&after[..2], before.as_slice());
        assert_eq!(engine.next_id.load(Ordering::SeqCst), 5);
        for id in &after[2..] {
            assert_eq!(s.container_gpus(id).await.unwrap().len(), 1);
        }
        assert_conserved(&s).await;
    }

    #[tokio::test]
    async fn test_scale_down_evicts_oldest_first() {
        let engine = Arc::new(FakeEngine::default());
        let s = scheduler(engine.clone(), 8);

        s.deploy_task(&test_spec("t", 4, 1)).await.unwrap();
        let before = s.store.get_container_ids("t").unwrap().unwrap();

        s.deploy_task(&test_spec("t", 1, 1)).await.unwrap();
        let after = s.store.get_container_ids("t").unwrap().unwrap();

        assert_eq!(after, vec![before[3].clone()]);
        assert_eq!(engine.live(), 1);
        assert_eq!(s.gpus_in_use().await, 1);
        assert_conserved(&s).await;
    }

    #[tokio::test]
    async fn test_scale_to_zero_releases_everything() {
        let engine = Arc::new(FakeEngine::default());
        let s = scheduler(engine.clone(), 4);

        s.deploy_task(&test_spec("t", 2, 2)).await.unwrap();
        assert_eq!(s.gpus_in_use().await, 4);

        s.deploy_task(&test_spec("t", 0, 2)).await.unwrap();
        assert_eq!(engine.live(), 0);
        assert_eq!(s.gpus_in_use().await, 0);
        assert!(s.store.get_container_ids("t").unwrap().is_none());
        assert_conserved(&s).await;
    }

    #[tokio::test]
    async fn test_delete_task_is_idempotent() {
        let engine = Arc::new(FakeEngine::default());
        let s = scheduler(engine.clone(), 2);

        let spec = test_spec("t", 2, 1);
        s.deploy_task(&spec).await.unwrap();
        s.delete_task(&spec).await.unwrap();
        s.delete_task(&spec).await.unwrap();
        assert_eq!(engine.live(), 0);
        assert_eq!(s.gpus_in_use().await, 0);
    }

    #[tokio::test]
    async fn test_launch_failure_rolls_back_gpus() {
        let engine = Arc::new(FakeEngine::default());
        engine.fail_launches.store(1, Ordering::SeqCst);
        let s = scheduler(engine.clone(), 4);

        let err = s.deploy_task(&test_spec("t", 2, 2)).await.unwrap_err();
        assert!(err.to_string().contains("1 of 2 replicas failed to start"));
        assert_eq!(engine.live(), 1);
        assert_eq!(s.gpus_in_use().await, 2);
        assert_eq!(s.store.get_container_ids("t").unwrap().unwrap().len(), 1);
        assert_conserved(&s).await;

        // The next reconcile fills the gap.
        s.deploy_task(&test_spec("t", 2, 2)).await.unwrap();
        assert_eq!(engine.live(), 2);
        assert_conserved(&s).await;
    }

    #[tokio::test]
    async fn test_start_failure_removes_created_container() {
        let engine = Arc::new(FakeEngine::default());
        engine.fail_starts.store(1, Ordering::SeqCst);
        let s = scheduler(engine.clone(), 4);

        let err = s.deploy_task(&test_spec("t", 2, 1)).await.unwrap_err();
        assert!(err.to_string().contains("1 of 2 replicas failed to start"));
        // Only the started replica is left on the host.
        assert_eq!(engine.live(), 1);
        assert_eq!(s.gpus_in_use().await, 1);
        assert_eq!(s.store.get_container_ids("t").unwrap().unwrap().len(), 1);
        assert_conserved(&s).await;

        s.deploy_task(&test_spec("t", 2, 1)).await.unwrap();
        assert_eq!(engine.live(), 2);
        assert!(s.is_task_running(&test_spec("t", 2, 1)).await.unwrap());
        assert_conserved(&s).await;
    }

    #[tokio::test]
    async fn test_short_pool_still_launches() {
        let engine = Arc::new(FakeEngine::default());
        let s = scheduler(engine.clone(), 1);

        s.deploy_task(&test_spec("t", 2, 1)).await.unwrap();
        let ids = s.store.get_container_ids("t").unwrap().unwrap();
        assert_eq!(s.container_gpus(&ids[0]).await.unwrap(), vec![0]);
        assert!(s.container_gpus(&ids[1]).await.unwrap().is_empty());
        assert_conserved(&s).await;
    }

    #[tokio::test]
    async fn test_conservation_across_tasks() {
        let engine = Arc::new(FakeEngine::default());
        let s = scheduler(engine.clone(), 8);

        let steps = [("a", 2, 2), ("b", 3, 1), ("a", 1, 2), ("b", 0, 1), ("a", 3, 2), ("b", 2, 1)];
        for (name, replica, tp) in steps {
            s.deploy_task(&test_spec(name, replica, tp)).await.unwrap();
            assert_conserved(&s).await;
        }
        assert_eq!(s.gpus_in_use().await, 8);
    }

    #[tokio::test]
    async fn test_launch_command_uses_replica_identity() {
        let engine = Arc::new(FakeEngine::default());
        let s = scheduler(engine.clone(), 2);
        s.deploy_task(&test_spec("t", 1, 1)).await.unwrap();

        let containers = engine.containers.lock().unwrap();
        let launch = &containers[0].1;
        assert!(launch.name.starts_with("t-svc-replica-"));
        assert_eq!(launch.name.len(), "t-svc-replica-".len() + 4);
        let cmd = launch.cmd.join(" ");
        assert!(cmd.contains(&format!("--exporter_service_name {}", launch.name)));
        assert!(cmd.contains("--exporter_endpoint otel:4318"));
        assert_eq!(launch.gpu_ids, vec!["0"]);
    }

    #[tokio::test]
    async fn test_running_state_follows_engine() {
        let engine = Arc::new(FakeEngine::default());
        let s = scheduler(engine.clone(), 2);
        let spec = test_spec("t", 2, 1);

        assert!(!s.is_task_running(&spec).await.unwrap());
        s.deploy_task(&spec).await.unwrap();
        assert!(s.is_task_running(&spec).await.unwrap());

        engine.set_status("exited");
        assert!(!s.is_task_running(&spec).await.unwrap());
        let infos = s.runtime_infos(&spec).await.unwrap();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(RuntimeInfo::is_exited));
    }
}
