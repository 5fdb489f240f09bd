//! Domain types for Loom
//!
//! - Repository: caller-supplied descriptor of a managed working tree
//! - ExecutionResult / BulkResult: per-repository results and their aggregate
//! - FreezeSnapshot: immutable commit/branch/dirty record over many repos
//! - StashRecord / StashEntry: coordinator-owned stashes

pub mod repository;
pub mod result;
pub mod snapshot;
pub mod stash;

pub use repository::Repository;
pub use result::{BulkResult, ExecutionResult, Outcome, OutcomeStatus, RepoFailure, RepoReading};
pub use snapshot::{FreezeSnapshot, RepoStateEntry, SnapshotSummary};
pub use stash::{StashEntry, StashRecord};
