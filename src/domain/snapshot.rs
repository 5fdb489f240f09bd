//! Freeze snapshot records.
//!
//! A snapshot captures commit, branch and dirty flag for a set of
//! repositories. It is immutable once built; the content hash lets a reader
//! detect a record that was edited on disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Branch name recorded for a detached HEAD.
pub const DETACHED_HEAD: &str = "HEAD";

/// State of one repository at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStateEntry {
    pub repo_name: String,
    pub path: String,
    pub commit_sha: String,
    pub branch: String,
    pub is_dirty: bool,
}

impl RepoStateEntry {
    pub fn is_detached(&self) -> bool {
        self.branch == DETACHED_HEAD
    }
}

/// Immutable point-in-time record over many repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeSnapshot {
    /// Storage key: `{name}_{YYYYmmdd_HHMMSS}`
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<RepoStateEntry>,
    pub content_hash: String,
}

impl FreezeSnapshot {
    /// Build a snapshot, sorting entries by repository name.
    pub fn new(name: impl Into<String>, created_at: DateTime<Utc>, mut entries: Vec<RepoStateEntry>) -> Self {
        let name = name.into();
        entries.sort_by(|a, b| a.repo_name.cmp(&b.repo_name).then_with(|| a.path.cmp(&b.path)));
        let content_hash = content_hash(&entries);
        Self {
            id: snapshot_id(&name, &created_at),
            name,
            created_at,
            entries,
            content_hash,
        }
    }

    /// Recompute the hash and compare it with the stored one.
    pub fn verify(&self) -> bool {
        content_hash(&self.entries) == self.content_hash
    }

    pub fn entry(&self, repo_name: &str) -> Option<&RepoStateEntry> {
        self.entries.iter().find(|e| e.repo_name == repo_name)
    }

    pub fn short_hash(&self) -> &str {
        self.content_hash.get(..8).unwrap_or(&self.content_hash)
    }

    /// One-line human description.
    pub fn describe(&self) -> String {
        if self.entries.is_empty() {
            return format!("Freeze snapshot '{}' (empty)", self.name);
        }
        format!(
            "Freeze snapshot '{}' capturing {} repo(s), hash {}",
            self.name,
            self.entries.len(),
            self.short_hash()
        )
    }

    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            content_hash: self.content_hash.clone(),
            repo_count: self.entries.len(),
        }
    }
}

/// Listing metadata for a stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub content_hash: String,
    pub repo_count: usize,
}

/// Storage key for a snapshot.
pub fn snapshot_id(name: &str, created_at: &DateTime<Utc>) -> String {
    format!("{}_{}", name, created_at.format("%Y%m%d_%H%M%S"))
}

/// SHA-256 over the ordered entries, one tab-separated line each.
pub fn content_hash(entries: &[RepoStateEntry]) -> String {
    let mut hasher = Sha256::new();
    for e in entries {
        hasher.update(
            format!(
                "{}\t{}\t{}\t{}\t{}\n",
                e.repo_name, e.path, e.commit_sha, e.branch, e.is_dirty
            )
            .as_bytes(),
        );
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(name: &str, sha: &str) -> RepoStateEntry {
        RepoStateEntry {
            repo_name: name.to_string(),
            path: format!("/src/{name}"),
            commit_sha: sha.to_string(),
            branch: "main".to_string(),
            is_dirty: false,
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_snapshot_id_format() {
        assert_eq!(snapshot_id("release", &at()), "release_20260314_092653");
    }

    #[test]
    fn test_entries_sorted_and_hash_order_independent() {
        let a = FreezeSnapshot::new("s", at(), vec![entry("b", "2"), entry("a", "1")]);
        let b = FreezeSnapshot::new("s", at(), vec![entry("a", "1"), entry("b", "2")]);
        assert_eq!(a.entries[0].repo_name, "a");
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
    }

    #[test]
    fn test_hash_changes_with_state() {
        let a = FreezeSnapshot::new("s", at(), vec![entry("a", "1")]);
        let mut dirty = entry("a", "1");
        dirty.is_dirty = true;
        let b = FreezeSnapshot::new("s", at(), vec![dirty]);
        assert_ne!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_verify_detects_tampering() {
        let mut snap = FreezeSnapshot::new("s", at(), vec![entry("a", "1")]);
        assert!(snap.verify());
        snap.entries[0].commit_sha = "deadbeef".to_string();
        assert!(!snap.verify());
    }

    #[test]
    fn test_describe() {
        let empty = FreezeSnapshot::new("s", at(), Vec::new());
        assert_eq!(empty.describe(), "Freeze snapshot 's' (empty)");
        let snap = FreezeSnapshot::new("s", at(), vec![entry("a", "1"), entry("b", "2")]);
        assert!(snap.describe().contains("2 repo(s)"));
        assert!(snap.describe().contains(snap.short_hash()));
    }

    #[test]
    fn test_summary_and_lookup() {
        let snap = FreezeSnapshot::new("s", at(), vec![entry("a", "1")]);
        let summary = snap.summary();
        assert_eq!(summary.repo_count, 1);
        assert_eq!(summary.id, snap.id);
        assert_eq!(snap.entry("a").unwrap().commit_sha, "1");
        assert!(snap.entry("b").is_none());
    }
}
