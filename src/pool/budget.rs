//! Counting-semaphore budget shared by tasks that must not exceed a fixed
//! number of simultaneous operations.

use crate::error::{LoomError, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A hard cap on in-flight operations.
///
/// Cloning shares the same underlying semaphore.
#[derive(Debug, Clone)]
pub struct ConcurrencyBudget {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyBudget {
    /// Create a budget of `limit` permits. A zero limit is raised to one so
    /// acquiring can never deadlock.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Wait for a permit. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| LoomError::TaskFailed(format!("concurrency budget closed: {}", e)))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held.
    pub fn in_use(&self) -> usize {
        self.limit - self.available()
    }
}
