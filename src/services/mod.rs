//! Multi-repository services built on the gateways and the worker pool.

mod bulk;
mod freeze;
mod stash;
mod status;

pub use bulk::BulkExecutor;
pub use freeze::{CreateReport, FreezeService, RestoreOutcome, RestoreReport};
pub use stash::{ClearOutcome, StashCoordinator, StashOutcome, StashStatus, UnstashOutcome};
pub use status::{RepoStatus, RepoStatusService, parse_porcelain_status};

use crate::domain::{BulkResult, Outcome};
use crate::error::{LoomError, Result};
use crate::pool::WorkerPool;
use std::future::Future;
use std::time::Instant;

/// Outcomes that can stand in for a repository whose task never finished.
pub(crate) trait Failable: Outcome {
    fn failed(repo: &str, err: &LoomError) -> Self;
}

/// Run `worker` over `items` in the pool and collect a report.
///
/// A worker error, panic or timeout becomes that item's failed outcome;
/// only an empty input or a bad pool is returned as an error.
pub(crate) async fn fan_out<T, O, N, F, Fut>(
    pool: &WorkerPool,
    items: Vec<T>,
    name_of: N,
    worker: F,
) -> Result<BulkResult<O>>
where
    T: Send + 'static,
    O: Failable + Send + 'static,
    N: Fn(&T) -> String,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    if items.is_empty() {
        return Err(LoomError::NoRepositories);
    }
    let started = Instant::now();
    let names: Vec<String> = items.iter().map(name_of).collect();
    let outcomes = pool.run(items, worker).await?;

    let results = outcomes
        .into_iter()
        .zip(&names)
        .map(|(outcome, name)| {
            outcome.unwrap_or_else(|e| {
                log::warn!("{}: {}", name, e);
                O::failed(name, &e)
            })
        })
        .collect();
    Ok(BulkResult::since(results, started))
}
