//! Bounded parallelism primitives.

mod budget;
mod worker_pool;

pub use budget::ConcurrencyBudget;
pub use worker_pool::{WorkerPool, run_bounded};
