//! Bounded worker pool shared by uploads and run preparation

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error)]
#[error("worker pool is closed")]
pub struct PoolClosed;

/// Caps how many jobs run at once across every user of the pool
#[derive(Clone, Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Pool sized to the host's available parallelism, times `per_core`
    pub fn per_core(per_core: usize) -> Self {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self::new(cores.saturating_mul(per_core))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Wait for a free slot, then drive `job` to completion while holding it
    pub async fn run<F>(&self, job: F) -> Result<F::Output, PoolClosed>
    where
        F: Future,
    {
        let _permit = self.permits.acquire().await.map_err(|_| PoolClosed)?;
        Ok(job.await)
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::per_core(4)
    }
}
