//! Scaler: the single consumer of the task queue.
//!
//! Pops desired specs one at a time and hands them to the resource
//! backend. A spec with zero replicas means "remove the task"; anything
//! else is a deploy. Backend failures are logged and the loop moves on;
//! the detector's next cycle re-queues the task if it is still wanted.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use servegrid_core::TaskSpec;
use servegrid_queue::TaskReceiver;

use crate::backend::ResourceBackend;
use crate::error::SchedulerResult;

pub struct Scaler {
    backend: Arc<dyn ResourceBackend>,
    queue: TaskReceiver,
}

impl Scaler {
    pub fn new(backend: Arc<dyn ResourceBackend>, queue: TaskReceiver) -> Self {
        Self { backend, queue }
    }

    /// Apply one spec to the backend.
    pub async fn reconcile(&self, spec: &TaskSpec) -> SchedulerResult<()> {
        if spec.replica == 0 {
            info!(task = %spec.name, "removing task");
            self.backend.delete_task(spec).await
        } else {
            info!(task = %spec.name, replicas = spec.replica, "deploying task");
            self.backend.deploy_task(spec).await
        }
    }

    /// Consume the queue until it closes or shutdown is signalled.
    ///
    /// A spec already taken from the queue is always applied before the
    /// shutdown signal is observed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("scaler started");

        loop {
            tokio::select! {
                next = self.queue.pop() => {
                    let Some(spec) = next else {
                        info!("task queue closed, scaler stopping");
                        break;
                    };
                    if let Err(e) = self.reconcile(&spec).await {
                        error!(task = %spec.name, error = %e, "reconcile failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("scaler shutting down");
                    break;
                }
            }
        }
    }
}
