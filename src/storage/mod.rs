//! Snapshot persistence.

mod file;
mod traits;

pub use file::FileSnapshotStore;
pub use traits::{SnapshotFilter, SnapshotStore};
