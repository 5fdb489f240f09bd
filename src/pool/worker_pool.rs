//! Bounded fan-out/fan-in over a list of items.

use crate::error::{LoomError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinError;

/// Runs one worker invocation per item with a cap on how many run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    max_concurrency: usize,
    timeout_per_item: Option<Duration>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(8)
    }
}

impl WorkerPool {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            timeout_per_item: None,
        }
    }

    /// Bound each worker invocation by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_per_item = Some(timeout);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn timeout_per_item(&self) -> Option<Duration> {
        self.timeout_per_item
    }

    /// Run `worker` over `items`. See [`run_bounded`].
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, worker: F) -> Result<Vec<Result<R>>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        run_bounded(items, worker, self.max_concurrency, self.timeout_per_item).await
    }
}

/// Run `worker` once per item, at most `max_concurrency` at a time.
///
/// Items are dispatched in input order and results come back in input
/// order, one per item. A worker that errors, panics or times out becomes a
/// failure in its own slot and never cancels its siblings. The only error
/// returned directly is a zero `max_concurrency` on a non-empty input.
pub async fn run_bounded<T, R, F, Fut>(
    items: Vec<T>,
    worker: F,
    max_concurrency: usize,
    timeout_per_item: Option<Duration>,
) -> Result<Vec<Result<R>>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }
    if max_concurrency == 0 {
        return Err(LoomError::InvalidArgument(
            "max_concurrency must be at least 1".to_string(),
        ));
    }

    let limit = max_concurrency.min(items.len());
    let semaphore = Arc::new(Semaphore::new(limit));
    let worker = Arc::new(worker);
    let mut handles = Vec::with_capacity(items.len());

    log::debug!("Dispatching {} item(s) with concurrency {}", items.len(), limit);

    for item in items {
        // Taking the permit before spawning keeps dispatch in input order.
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|e| LoomError::TaskFailed(e.to_string()))?;
        let worker = Arc::clone(&worker);

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let fut = worker(item);
            match timeout_per_item {
                Some(timeout) => tokio::time::timeout(timeout, fut).await.map_err(|_| {
                    LoomError::TimeoutExceeded {
                        command: "worker task".to_string(),
                        timeout,
                    }
                })?,
                None => fut.await,
            }
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(match handle.await {
            Ok(result) => result,
            Err(e) => Err(join_failure(e)),
        });
    }
    Ok(results)
}

fn join_failure(err: JoinError) -> LoomError {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        LoomError::TaskFailed(format!("worker panicked: {}", message))
    } else {
        LoomError::TaskFailed("worker cancelled".to_string())
    }
}
