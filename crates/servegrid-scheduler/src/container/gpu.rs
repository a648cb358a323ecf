//! GPU pool accounting for the container backend.

use std::collections::BTreeMap;

use tokio::process::Command;
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuStatus {
    Available,
    InUsed,
}

/// GPU index → status, ordered by index.
#[derive(Debug, Clone, Default)]
pub struct GpuPool {
    gpus: BTreeMap<u32, GpuStatus>,
}

impl GpuPool {
    pub fn new(indices: impl IntoIterator<Item = u32>) -> Self {
        Self {
            gpus: indices
                .into_iter()
                .map(|i| (i, GpuStatus::Available))
                .collect(),
        }
    }

    /// Mark up to `want` available GPUs as in use, lowest index first.
    ///
    /// Returns fewer than `want` indices when the pool runs short.
    pub fn allocate(&mut self, want: usize) -> Vec<u32> {
        let picked: Vec<u32> = self
            .gpus
            .iter()
            .filter(|(_, status)| **status == GpuStatus::Available)
            .map(|(idx, _)| *idx)
            .take(want)
            .collect();
        for idx in &picked {
            self.gpus.insert(*idx, GpuStatus::InUsed);
        }
        picked
    }

    /// Return GPUs to the pool. Unknown indices are ignored.
    pub fn release(&mut self, indices: &[u32]) {
        for idx in indices {
            if let Some(status) = self.gpus.get_mut(idx) {
                *status = GpuStatus::Available;
            }
        }
    }

    pub fn status(&self, idx: u32) -> Option<GpuStatus> {
        self.gpus.get(&idx).copied()
    }

    pub fn in_use(&self) -> usize {
        self.gpus
            .values()
            .filter(|s| **s == GpuStatus::InUsed)
            .count()
    }

    pub fn available(&self) -> usize {
        self.gpus.len() - self.in_use()
    }

    pub fn len(&self) -> usize {
        self.gpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gpus.is_empty()
    }
}

/// Enumerate local GPUs with `nvidia-smi`.
pub async fn discover_gpus() -> SchedulerResult<Vec<u32>> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=index", "--format=csv,noheader,nounits"])
        .output()
        .await
        .map_err(|e| SchedulerError::GpuDiscovery(e.to_string()))?;
    if !output.status.success() {
        return Err(SchedulerError::GpuDiscovery(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    let indices = parse_gpu_indices(&String::from_utf8_lossy(&output.stdout));
    debug!(count = indices.len(), "gpus discovered");
    Ok(indices)
}

fn parse_gpu_indices(stdout: &str) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_lowest_first() {
        let mut pool = GpuPool::new(0..4);
        assert_eq!(pool.allocate(2), vec![0, 1]);
        assert_eq!(pool.allocate(1), vec![2]);
        assert_eq!(pool.in_use(), 3);
        assert_eq!(pool.status(1), Some(GpuStatus::InUsed));
        assert_eq!(pool.status(3), Some(GpuStatus::Available));
    }

    #[test]
    fn test_allocate_short_pool() {
        let mut pool = GpuPool::new([0, 1]);
        assert_eq!(pool.allocate(4), vec![0, 1]);
        assert!(pool.allocate(1).is_empty());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_release_reuses_freed_gpus() {
        let mut pool = GpuPool::new(0..3);
        let a = pool.allocate(1);
        let _b = pool.allocate(1);
        pool.release(&a);
        assert_eq!(pool.allocate(1), vec![0]);
        pool.release(&[42]);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_parse_nvidia_smi_output() {
        assert_eq!(parse_gpu_indices("0\n1\n 2 \n\n"), vec![0, 1, 2]);
        assert!(parse_gpu_indices("No devices were found").is_empty());
    }
}
