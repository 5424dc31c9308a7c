use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::error;

use crate::error::{Error, Result};

/// Default number of units of work allowed in flight.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Runs units of work on the runtime with at most `size` of them in flight.
/// Excess units queue in arrival order until a slot frees up.
#[derive(Debug, Clone)]
pub(crate) struct WorkerPool {
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

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawn `unit` onto the pool and wait for its completion. The unit runs
    /// detached from the caller's task, so dropping the returned future does
    /// not abort it.
    pub async fn run<F, T>(&self, unit: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        let handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.map_err(|_| Error::PoolClosed)?;
            unit.await
        });

        handle.await.map_err(|e| {
            error!("Unit of work aborted: {}", e);
            Error::InternalError(format!("unit of work aborted: {e}"))
        })?
    }

    /// Stop admitting new units. Queued units fail with `PoolClosed`.
    pub fn close(&self) {
        self.permits.close();
    }
}
