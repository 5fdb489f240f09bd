//! Snapshot store trait and lookup filter.

use crate::domain::{FreezeSnapshot, SnapshotSummary};
use crate::error::{LoomError, Result};

/// Narrows a snapshot listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotFilter {
    /// Substring of the snapshot name
    pub name_contains: Option<String>,
}

impl SnapshotFilter {
    pub fn name_contains(needle: impl Into<String>) -> Self {
        Self {
            name_contains: Some(needle.into()),
        }
    }

    pub fn matches(&self, snapshot: &SnapshotSummary) -> bool {
        match &self.name_contains {
            Some(needle) => snapshot.name.contains(needle.as_str()),
            None => true,
        }
    }
}

/// Persistence for freeze snapshots, keyed by snapshot id.
pub trait SnapshotStore: Send + Sync + std::fmt::Debug {
    /// Persist a new snapshot. Fails with `SnapshotExists` if the id is taken;
    /// a stored record is never replaced.
    fn save(&self, snapshot: &FreezeSnapshot) -> Result<()>;

    /// Load by id.
    fn load(&self, id: &str) -> Result<Option<FreezeSnapshot>>;

    /// All stored snapshots, newest first.
    fn list(&self) -> Result<Vec<FreezeSnapshot>>;

    /// Remove by id. Returns whether a record existed.
    fn delete(&self, id: &str) -> Result<bool>;

    /// Look up by id, else by name taking the newest.
    fn find(&self, name_or_id: &str) -> Result<FreezeSnapshot> {
        if let Some(snapshot) = self.load(name_or_id)? {
            return Ok(snapshot);
        }
        self.list()?
            .into_iter()
            .find(|s| s.name == name_or_id)
            .ok_or_else(|| LoomError::SnapshotNotFound(name_or_id.to_string()))
    }

    /// Summaries matching `filter`, newest first.
    fn summaries(&self, filter: &SnapshotFilter) -> Result<Vec<SnapshotSummary>> {
        Ok(self
            .list()?
            .iter()
            .map(FreezeSnapshot::summary)
            .filter(|s| filter.matches(s))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn summary(name: &str) -> SnapshotSummary {
        FreezeSnapshot::new(name, Utc::now(), Vec::new()).summary()
    }

    #[test]
    fn test_filter_default_matches_all() {
        assert!(SnapshotFilter::default().matches(&summary("anything")));
    }

    #[test]
    fn test_filter_name_contains() {
        let filter = SnapshotFilter::name_contains("release");
        assert!(filter.matches(&summary("pre-release-1")));
        assert!(!filter.matches(&summary("nightly")));
    }
}
