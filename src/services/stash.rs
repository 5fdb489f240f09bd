//! StashCoordinator: coordinated stash save/pop across repositories.
//!
//! Only stashes whose message starts with the coordinator prefix are ever
//! popped or dropped; user stashes are listed but never touched.

use super::{Failable, fan_out};
use crate::domain::stash::{DEFAULT_STASH_PREFIX, STASH_LIST_FORMAT, parse_stash_list};
use crate::domain::{BulkResult, Outcome, OutcomeStatus, RepoFailure, RepoReading, Repository, StashEntry, StashRecord};
use crate::error::{ErrorKind, LoomError, Result};
use crate::git::{GitGateway, RunOptions};
use crate::pool::WorkerPool;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Per-repository result of [`StashCoordinator::stash_all`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StashOutcome {
    Stashed(StashRecord),
    /// Nothing to stash
    Clean { repo: String },
    Failed(RepoFailure),
}

impl Outcome for StashOutcome {
    fn repo(&self) -> &str {
        match self {
            Self::Stashed(r) => &r.repo_name,
            Self::Clean { repo } => repo,
            Self::Failed(f) => &f.repo,
        }
    }

    fn status(&self) -> OutcomeStatus {
        match self {
            Self::Stashed(_) => OutcomeStatus::Succeeded,
            Self::Clean { .. } => OutcomeStatus::Skipped,
            Self::Failed(_) => OutcomeStatus::Failed,
        }
    }
}

impl Failable for StashOutcome {
    fn failed(repo: &str, err: &LoomError) -> Self {
        Self::Failed(RepoFailure::new(repo, err))
    }
}

/// Per-repository result of [`StashCoordinator::unstash_all`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnstashOutcome {
    Restored(StashRecord),
    /// No coordinator stash matched
    NoStash { repo: String },
    /// The pop left conflicts; the stash entry is kept
    Conflict {
        repo: String,
        stash_ref: String,
        /// Always `conflict_during_restore`
        kind: ErrorKind,
        error: String,
    },
    Failed(RepoFailure),
}

impl Outcome for UnstashOutcome {
    fn repo(&self) -> &str {
        match self {
            Self::Restored(r) => &r.repo_name,
            Self::NoStash { repo } | Self::Conflict { repo, .. } => repo,
            Self::Failed(f) => &f.repo,
        }
    }

    fn status(&self) -> OutcomeStatus {
        match self {
            Self::Restored(_) => OutcomeStatus::Succeeded,
            Self::NoStash { .. } => OutcomeStatus::Skipped,
            Self::Conflict { .. } | Self::Failed(_) => OutcomeStatus::Failed,
        }
    }
}

impl Failable for UnstashOutcome {
    fn failed(repo: &str, err: &LoomError) -> Self {
        Self::Failed(RepoFailure::new(repo, err))
    }
}

/// Per-repository result of [`StashCoordinator::clear_loom_stashes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClearOutcome {
    Cleared { repo: String, dropped: Vec<String> },
    Nothing { repo: String },
    Failed(RepoFailure),
}

impl Outcome for ClearOutcome {
    fn repo(&self) -> &str {
        match self {
            Self::Cleared { repo, .. } | Self::Nothing { repo } => repo,
            Self::Failed(f) => &f.repo,
        }
    }

    fn status(&self) -> OutcomeStatus {
        match self {
            Self::Cleared { .. } => OutcomeStatus::Succeeded,
            Self::Nothing { .. } => OutcomeStatus::Skipped,
            Self::Failed(_) => OutcomeStatus::Failed,
        }
    }
}

impl Failable for ClearOutcome {
    fn failed(repo: &str, err: &LoomError) -> Self {
        Self::Failed(RepoFailure::new(repo, err))
    }
}

impl<T> Failable for RepoReading<T> {
    fn failed(repo: &str, err: &LoomError) -> Self {
        Self::Failed(RepoFailure::new(repo, err))
    }
}

/// Stash overview for one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StashStatus {
    pub is_dirty: bool,
    pub total_stashes: usize,
    pub loom_stashes: usize,
    /// Newest coordinator stash
    pub latest: Option<StashEntry>,
}

/// Coordinates prefixed stashes over many repositories.
#[derive(Debug, Clone)]
pub struct StashCoordinator {
    git: Arc<GitGateway>,
    pool: WorkerPool,
    prefix: Arc<str>,
}

impl StashCoordinator {
    pub fn new(git: Arc<GitGateway>) -> Self {
        Self {
            git,
            pool: WorkerPool::default(),
            prefix: Arc::from(DEFAULT_STASH_PREFIX),
        }
    }

    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.prefix = Arc::from(prefix.as_ref());
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Stash every dirty repository, untracked files included. The message
    /// defaults to the current UTC timestamp.
    pub async fn stash_all(&self, repos: &[Repository], message: Option<&str>) -> Result<BulkResult<StashOutcome>> {
        let message: Arc<str> = match message {
            Some(m) => Arc::from(m),
            None => Arc::from(Utc::now().format("%Y%m%d_%H%M%S").to_string()),
        };
        log::info!("Stashing {} repositories with message '{}'", repos.len(), message);

        let this = self.clone();
        fan_out(&self.pool, repos.to_vec(), |r| r.name.clone(), move |repo| {
            let this = this.clone();
            let message = Arc::clone(&message);
            async move { this.stash_one(repo, &message).await }
        })
        .await
    }

    /// Pop the newest coordinator stash in every repository, optionally only
    /// one whose message contains `filter`.
    pub async fn unstash_all(&self, repos: &[Repository], filter: Option<&str>) -> Result<BulkResult<UnstashOutcome>> {
        let filter: Option<Arc<str>> = filter.map(Arc::from);
        let this = self.clone();
        fan_out(&self.pool, repos.to_vec(), |r| r.name.clone(), move |repo| {
            let this = this.clone();
            let filter = filter.clone();
            async move { this.unstash_one(repo, filter.as_deref()).await }
        })
        .await
    }

    /// Every stash entry per repository, coordinator ones flagged.
    pub async fn list_stashes(&self, repos: &[Repository]) -> Result<BulkResult<RepoReading<Vec<StashEntry>>>> {
        let this = self.clone();
        fan_out(&self.pool, repos.to_vec(), |r| r.name.clone(), move |repo| {
            let this = this.clone();
            async move { this.list_one(repo).await }
        })
        .await
    }

    /// Dirty flag and stash counts per repository.
    pub async fn stash_status(&self, repos: &[Repository]) -> Result<BulkResult<RepoReading<StashStatus>>> {
        let this = self.clone();
        fan_out(&self.pool, repos.to_vec(), |r| r.name.clone(), move |repo| {
            let this = this.clone();
            async move { this.status_one(repo).await }
        })
        .await
    }

    /// Drop every coordinator stash, leaving user stashes in place.
    pub async fn clear_loom_stashes(&self, repos: &[Repository]) -> Result<BulkResult<ClearOutcome>> {
        let this = self.clone();
        fan_out(&self.pool, repos.to_vec(), |r| r.name.clone(), move |repo| {
            let this = this.clone();
            async move { this.clear_one(repo).await }
        })
        .await
    }

    async fn stash_one(&self, repo: Repository, message: &str) -> Result<StashOutcome> {
        let path = repo.validate()?;
        Ok(match self.stash_repo(&repo.name, &path, message).await? {
            Some(record) => StashOutcome::Stashed(record),
            None => StashOutcome::Clean { repo: repo.name },
        })
    }

    async fn unstash_one(&self, repo: Repository, filter: Option<&str>) -> Result<UnstashOutcome> {
        let path = repo.validate()?;
        self.unstash_repo(&repo.name, &path, filter).await
    }

    async fn list_one(&self, repo: Repository) -> Result<RepoReading<Vec<StashEntry>>> {
        let path = repo.validate()?;
        let value = self.entries(&path).await?;
        Ok(RepoReading::Read { repo: repo.name, value })
    }

    async fn status_one(&self, repo: Repository) -> Result<RepoReading<StashStatus>> {
        let path = repo.validate()?;
        let is_dirty = self.git.is_dirty(&path).await?;
        let entries = self.entries(&path).await?;
        let latest = entries.iter().find(|e| e.is_loom).cloned();
        let value = StashStatus {
            is_dirty,
            total_stashes: entries.len(),
            loom_stashes: entries.iter().filter(|e| e.is_loom).count(),
            latest,
        };
        Ok(RepoReading::Read { repo: repo.name, value })
    }

    async fn clear_one(&self, repo: Repository) -> Result<ClearOutcome> {
        let path = repo.validate()?;
        let mut loom: Vec<StashEntry> = self.entries(&path).await?.into_iter().filter(|e| e.is_loom).collect();
        if loom.is_empty() {
            return Ok(ClearOutcome::Nothing { repo: repo.name });
        }
        // Dropping a stash renumbers the ones above it.
        loom.sort_by(|a, b| b.index.cmp(&a.index));
        let mut dropped = Vec::with_capacity(loom.len());
        for entry in loom {
            self.git.stash(&path, &["drop", entry.reference.as_str()]).await?;
            dropped.push(entry.reference);
        }
        log::info!("Dropped {} stash(es) in {}", dropped.len(), repo.name);
        Ok(ClearOutcome::Cleared { repo: repo.name, dropped })
    }

    /// Stash one repository if it is dirty. Returns `None` when clean.
    pub(crate) async fn stash_repo(&self, repo_name: &str, path: &Path, message: &str) -> Result<Option<StashRecord>> {
        if !self.git.is_dirty(path).await? {
            return Ok(None);
        }
        let full = format!("{}{}", self.prefix, message);
        self.git.stash(path, &["push", "--include-untracked", "-m", full.as_str()]).await?;

        let entry = self
            .entries(path)
            .await?
            .into_iter()
            .find(|e| e.message == full)
            .ok_or_else(|| LoomError::GitCommand {
                command: "git stash push".to_string(),
                return_code: 0,
                stdout: String::new(),
                stderr: format!("stash '{}' not found after push", full),
            })?;
        log::info!("Stashed {} as {}", repo_name, entry.reference);
        Ok(Some(entry.into_record(repo_name)))
    }

    async fn unstash_repo(&self, repo_name: &str, path: &Path, filter: Option<&str>) -> Result<UnstashOutcome> {
        let entry = self
            .entries(path)
            .await?
            .into_iter()
            .filter(|e| e.is_loom)
            .find(|e| filter.is_none_or(|f| e.message.contains(f)));
        let Some(entry) = entry else {
            return Ok(UnstashOutcome::NoStash {
                repo: repo_name.to_string(),
            });
        };

        let out = self
            .git
            .run(&["stash", "pop", entry.reference.as_str()], Some(path), &RunOptions::unchecked())
            .await?;
        if out.success {
            log::info!("Restored {} in {}", entry.reference, repo_name);
            return Ok(UnstashOutcome::Restored(entry.into_record(repo_name)));
        }

        let combined = format!("{}{}", out.stdout, out.stderr);
        if combined.to_lowercase().contains("conflict") || !self.unmerged_paths(path).await?.is_empty() {
            log::warn!("Conflict popping {} in {}", entry.reference, repo_name);
            let err = LoomError::ConflictDuringRestore {
                repo: repo_name.to_string(),
                detail: combined.trim().to_string(),
            };
            return Ok(UnstashOutcome::Conflict {
                repo: repo_name.to_string(),
                stash_ref: entry.reference,
                kind: err.kind(),
                error: err.to_string(),
            });
        }
        Err(LoomError::GitCommand {
            command: out.command,
            return_code: out.return_code,
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }

    async fn entries(&self, path: &Path) -> Result<Vec<StashEntry>> {
        let out = self.git.stash(path, &["list", STASH_LIST_FORMAT]).await?;
        Ok(parse_stash_list(&out.stdout, &self.prefix))
    }

    async fn unmerged_paths(&self, path: &Path) -> Result<Vec<String>> {
        let out = self.git.diff(path, &["--name-only", "--diff-filter=U"]).await?;
        Ok(out.stdout.lines().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::fixture::{commit_file, git, init_repo};
    use tempfile::TempDir;

    fn coordinator() -> StashCoordinator {
        StashCoordinator::new(Arc::new(GitGateway::default())).with_pool(WorkerPool::new(4))
    }

    #[tokio::test]
    async fn test_stash_all_skips_clean() {
        let temp = TempDir::new().unwrap();
        let clean = init_repo(temp.path(), "clean");
        let dirty = init_repo(temp.path(), "dirty");
        std::fs::write(dirty.join("README.md"), "edited\n").unwrap();
        std::fs::write(dirty.join("new.txt"), "untracked\n").unwrap();
        let repos = vec![Repository::new("clean", &clean), Repository::new("dirty", &dirty)];

        let report = coordinator().stash_all(&repos, Some("pre-upgrade")).await.unwrap();
        assert_eq!(report.succeeded_count, 1);
        assert_eq!(report.skipped_count, 1);
        match report.get("dirty").unwrap() {
            StashOutcome::Stashed(record) => {
                assert_eq!(record.message, "loom-stash:pre-upgrade");
                assert_eq!(record.stash_ref, "stash@{0}");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(git(&dirty, &["status", "--porcelain"]), "");
        assert!(!dirty.join("new.txt").exists());
    }

    #[tokio::test]
    async fn test_round_trip_restores_working_tree() {
        let temp = TempDir::new().unwrap();
        let repo = init_repo(temp.path(), "repo");
        std::fs::write(repo.join("README.md"), "edited\n").unwrap();
        std::fs::write(repo.join("new.txt"), "untracked\n").unwrap();
        let repos = vec![Repository::new("repo", &repo)];
        let coord = coordinator();

        coord.stash_all(&repos, None).await.unwrap();
        let report = coord.unstash_all(&repos, None).await.unwrap();
        assert!(matches!(report.results[0], UnstashOutcome::Restored(_)));
        assert_eq!(std::fs::read_to_string(repo.join("README.md")).unwrap(), "edited\n");
        assert_eq!(std::fs::read_to_string(repo.join("new.txt")).unwrap(), "untracked\n");
        assert_eq!(git(&repo, &["stash", "list"]), "");
    }

    #[tokio::test]
    async fn test_user_stashes_are_never_touched() {
        let temp = TempDir::new().unwrap();
        let repo = init_repo(temp.path(), "repo");
        std::fs::write(repo.join("README.md"), "mine\n").unwrap();
        git(&repo, &["stash", "push", "-m", "my own work"]);
        let repos = vec![Repository::new("repo", &repo)];
        let coord = coordinator();

        let report = coord.unstash_all(&repos, None).await.unwrap();
        assert!(matches!(report.results[0], UnstashOutcome::NoStash { .. }));

        let cleared = coord.clear_loom_stashes(&repos).await.unwrap();
        assert!(matches!(cleared.results[0], ClearOutcome::Nothing { .. }));
        assert!(git(&repo, &["stash", "list"]).contains("my own work"));
    }

    #[tokio::test]
    async fn test_unstash_filter() {
        let temp = TempDir::new().unwrap();
        let repo = init_repo(temp.path(), "repo");
        let repos = vec![Repository::new("repo", &repo)];
        let coord = coordinator();

        std::fs::write(repo.join("a.txt"), "a\n").unwrap();
        coord.stash_all(&repos, Some("first")).await.unwrap();
        std::fs::write(repo.join("b.txt"), "b\n").unwrap();
        coord.stash_all(&repos, Some("second")).await.unwrap();

        let report = coord.unstash_all(&repos, Some("first")).await.unwrap();
        match &report.results[0] {
            UnstashOutcome::Restored(record) => assert_eq!(record.message, "loom-stash:first"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(repo.join("a.txt").exists());
        assert!(!repo.join("b.txt").exists());
    }

    #[tokio::test]
    async fn test_conflict_is_reported() {
        let temp = TempDir::new().unwrap();
        let repo = init_repo(temp.path(), "repo");
        let repos = vec![Repository::new("repo", &repo)];
        let coord = coordinator();

        std::fs::write(repo.join("README.md"), "stashed change\n").unwrap();
        coord.stash_all(&repos, Some("conflicting")).await.unwrap();
        commit_file(&repo, "README.md", "committed change\n", "diverge");

        let report = coord.unstash_all(&repos, None).await.unwrap();
        assert_eq!(report.failed_count, 1);
        match &report.results[0] {
            UnstashOutcome::Conflict {
                stash_ref, kind, error, ..
            } => {
                assert_eq!(stash_ref, "stash@{0}");
                assert_eq!(*kind, ErrorKind::ConflictDuringRestore);
                assert!(error.to_lowercase().contains("conflict"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        let json = serde_json::to_value(&report.results[0]).unwrap();
        assert_eq!(json["status"], "conflict");
        assert_eq!(json["kind"], "conflict_during_restore");
        // The stash survives for manual resolution.
        assert!(git(&repo, &["stash", "list"]).contains("loom-stash:conflicting"));
    }

    #[tokio::test]
    async fn test_status_list_and_clear() {
        let temp = TempDir::new().unwrap();
        let repo = init_repo(temp.path(), "repo");
        let repos = vec![Repository::new("repo", &repo)];
        let coord = coordinator();

        std::fs::write(repo.join("user.txt"), "u\n").unwrap();
        git(&repo, &["stash", "push", "-u", "-m", "user stash"]);
        for name in ["one", "two"] {
            std::fs::write(repo.join(format!("{}.txt", name)), name).unwrap();
            coord.stash_all(&repos, Some(name)).await.unwrap();
        }
        std::fs::write(repo.join("README.md"), "dirty\n").unwrap();

        let status = coord.stash_status(&repos).await.unwrap();
        let value = status.results[0].value().unwrap();
        assert!(value.is_dirty);
        assert_eq!(value.total_stashes, 3);
        assert_eq!(value.loom_stashes, 2);
        assert_eq!(value.latest.as_ref().unwrap().message, "loom-stash:two");

        let listing = coord.list_stashes(&repos).await.unwrap();
        let entries = listing.results[0].value().unwrap();
        assert_eq!(entries.iter().filter(|e| e.is_loom).count(), 2);

        let cleared = coord.clear_loom_stashes(&repos).await.unwrap();
        match &cleared.results[0] {
            ClearOutcome::Cleared { dropped, .. } => {
                assert_eq!(dropped, &vec!["stash@{1}".to_string(), "stash@{0}".to_string()]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        let remaining = git(&repo, &["stash", "list"]);
        assert_eq!(remaining.lines().count(), 1);
        assert!(remaining.contains("user stash"));
    }

    #[tokio::test]
    async fn test_custom_prefix_and_missing_repo() {
        let temp = TempDir::new().unwrap();
        let repo = init_repo(temp.path(), "repo");
        std::fs::write(repo.join("README.md"), "x\n").unwrap();
        let repos = vec![
            Repository::new("repo", &repo),
            Repository::new("missing", temp.path().join("missing")),
        ];
        let coord = coordinator().with_prefix("ci:");

        let report = coord.stash_all(&repos, Some("run-1")).await.unwrap();
        assert_eq!(report.succeeded_count, 1);
        assert_eq!(report.failed_count, 1);
        match report.get("missing").unwrap() {
            StashOutcome::Failed(f) => assert_eq!(f.kind, crate::error::ErrorKind::PathNotFound),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(git(&repo, &["stash", "list"]).contains("ci:run-1"));
    }
}
