//! Task queue halves.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use servegrid_core::TaskSpec;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("task queue closed")]
    Closed,
}

type Pending = Arc<Mutex<HashMap<String, TaskSpec>>>;

/// Create a queue whose channel holds at most `capacity` task names.
///
/// With the default capacity of 1 a producer blocks as soon as one task is
/// waiting, so a slow scaler throttles its producers.
pub fn task_queue(capacity: usize) -> (TaskSender, TaskReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
    (
        TaskSender {
            tx,
            pending: pending.clone(),
        },
        TaskReceiver { rx, pending },
    )
}

/// Producer half. Cheap to clone.
#[derive(Clone)]
pub struct TaskSender {
    tx: mpsc::Sender<String>,
    pending: Pending,
}

impl TaskSender {
    /// Hand a spec to the scaler, waiting while the channel is full.
    ///
    /// If the same task is already pending, its spec is replaced in place
    /// and the call returns without waiting.
    pub async fn append(&self, spec: TaskSpec) -> Result<(), QueueError> {
        let name = spec.name.clone();
        if let Some(slot) = self.pending.lock().await.get_mut(&name) {
            *slot = spec;
            debug!(task = %name, "pending task updated in place");
            return Ok(());
        }

        // Nothing is recorded until a channel slot is held, so dropping this
        // future while it waits leaves the queue untouched.
        let permit = self.tx.reserve().await.map_err(|_| QueueError::Closed)?;

        let mut pending = self.pending.lock().await;
        if let Some(slot) = pending.get_mut(&name) {
            *slot = spec;
            debug!(task = %name, "pending task updated in place");
            return Ok(());
        }
        pending.insert(name.clone(), spec);
        permit.send(name.clone());
        debug!(task = %name, "task enqueued");
        Ok(())
    }

    /// Number of tasks waiting for the scaler.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Consumer half. There is exactly one.
pub struct TaskReceiver {
    rx: mpsc::Receiver<String>,
    pending: Pending,
}

impl TaskReceiver {
    /// Wait for the next spec. `None` once every sender is gone.
    pub async fn pop(&mut self) -> Option<TaskSpec> {
        loop {
            let name = self.rx.recv().await?;
            if let Some(spec) = self.pending.lock().await.remove(&name) {
                return Some(spec);
            }
        }
    }

    /// Take the next spec if one is ready right now.
    pub async fn try_pop(&mut self) -> Option<TaskSpec> {
        while let Ok(name) = self.rx.try_recv() {
            if let Some(spec) = self.pending.lock().await.remove(&name) {
                return Some(spec);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spec(name: &str, replica: u32) -> TaskSpec {
        TaskSpec {
            name: name.to_string(),
            replica,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = task_queue(4);
        tx.append(spec("a", 1)).await.unwrap();
        tx.append(spec("b", 1)).await.unwrap();
        tx.append(spec("c", 1)).await.unwrap();

        assert_eq!(rx.pop().await.unwrap().name, "a");
        assert_eq!(rx.pop().await.unwrap().name, "b");
        assert_eq!(rx.pop().await.unwrap().name, "c");
    }

    #[tokio::test]
    async fn test_pending_task_is_coalesced_to_newest() {
        let (tx, mut rx) = task_queue(4);
        tx.append(spec("a", 1)).await.unwrap();
        tx.append(spec("a", 3)).await.unwrap();
        assert_eq!(tx.pending_len().await, 1);

        let popped = rx.pop().await.unwrap();
        assert_eq!(popped.replica, 3);
        assert!(rx.try_pop().await.is_none());
    }

    #[tokio::test]
    async fn test_task_can_be_requeued_after_pop() {
        let (tx, mut rx) = task_queue(4);
        tx.append(spec("a", 1)).await.unwrap();
        rx.pop().await.unwrap();

        tx.append(spec("a", 0)).await.unwrap();
        assert_eq!(rx.pop().await.unwrap().replica, 0);
    }

    #[tokio::test]
    async fn test_pop_returns_none_when_closed() {
        let (tx, mut rx) = task_queue(1);
        drop(tx);
        assert!(rx.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_append_fails_when_receiver_dropped() {
        let (tx, rx) = task_queue(1);
        drop(rx);
        assert_eq!(tx.append(spec("a", 1)).await, Err(QueueError::Closed));
        assert_eq!(tx.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_append_blocks_while_full() {
        let (tx, mut rx) = task_queue(1);
        tx.append(spec("a", 1)).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.append(spec("b", 1))).await;
        assert!(blocked.is_err(), "second distinct task should wait for the consumer");

        assert_eq!(tx.pending_len().await, 1);
        assert_eq!(rx.pop().await.unwrap().name, "a");

        tx.append(spec("b", 1)).await.unwrap();
        assert_eq!(rx.pop().await.unwrap().name, "b");
    }

    #[tokio::test]
    async fn test_blocked_producer_resumes_after_pop() {
        let (tx, mut rx) = task_queue(1);
        tx.append(spec("a", 1)).await.unwrap();

        let producer = {
            let tx = tx.clone();
            tokio::spawn(async move { tx.append(spec("b", 2)).await })
        };

        assert_eq!(rx.pop().await.unwrap().name, "a");
        producer.await.unwrap().unwrap();
        assert_eq!(rx.pop().await.unwrap().name, "b");
    }
}
