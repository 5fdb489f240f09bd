//! Loom - run shell and git operations across many local repositories.
//!
//! Every bulk operation fans out one task per repository through a bounded
//! worker pool and returns a report keyed by repository. On top of that sit
//! freeze snapshots (record and restore commit/branch state) and a stash
//! coordinator that owns a prefixed namespace of stashes.

pub mod domain;
pub mod error;
pub mod git;
pub mod operation;
pub mod pool;
pub mod services;
pub mod shell;
pub mod storage;

pub use error::{LoomError, Result};
