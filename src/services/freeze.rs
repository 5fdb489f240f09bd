//! FreezeService: capture and restore commit/branch state over many
//! repositories.
//!
//! There is no cross-repository transaction. A restore that fails in one
//! repository still restores the others, and the report says which is which.

use super::stash::StashCoordinator;
use super::{Failable, fan_out};
use crate::domain::{
    BulkResult, FreezeSnapshot, Outcome, OutcomeStatus, RepoFailure, RepoStateEntry, Repository, SnapshotSummary,
};
use crate::error::{LoomError, Result};
use crate::git::GitGateway;
use crate::pool::WorkerPool;
use crate::storage::{SnapshotFilter, SnapshotStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What [`FreezeService::create`] stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateReport {
    pub snapshot: FreezeSnapshot,
    /// Repositories left out of the snapshot
    pub per_repo_errors: Vec<RepoFailure>,
}

/// Per-repository result of a restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RestoreOutcome {
    Restored {
        repo: String,
        previous_sha: String,
        previous_branch: String,
        commit_sha: String,
        branch: String,
        /// Stash holding local changes found before the restore
        backup_stash: Option<String>,
    },
    Skipped {
        repo: String,
        reason: String,
    },
    Failed(RepoFailure),
}

impl Outcome for RestoreOutcome {
    fn repo(&self) -> &str {
        match self {
            Self::Restored { repo, .. } | Self::Skipped { repo, .. } => repo,
            Self::Failed(f) => &f.repo,
        }
    }

    fn status(&self) -> OutcomeStatus {
        match self {
            Self::Restored { .. } => OutcomeStatus::Succeeded,
            Self::Skipped { .. } => OutcomeStatus::Skipped,
            Self::Failed(_) => OutcomeStatus::Failed,
        }
    }
}

impl Failable for RestoreOutcome {
    fn failed(repo: &str, err: &LoomError) -> Self {
        Self::Failed(RepoFailure::new(repo, err))
    }
}

/// Result of [`FreezeService::restore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreReport {
    pub snapshot_id: String,
    pub snapshot_name: String,
    #[serde(flatten)]
    pub report: BulkResult<RestoreOutcome>,
}

/// Outcome of reading one repository's state during create.
enum Capture {
    Captured(RepoStateEntry),
    Failed(RepoFailure),
}

impl Outcome for Capture {
    fn repo(&self) -> &str {
        match self {
            Self::Captured(e) => &e.repo_name,
            Self::Failed(f) => &f.repo,
        }
    }

    fn status(&self) -> OutcomeStatus {
        match self {
            Self::Captured(_) => OutcomeStatus::Succeeded,
            Self::Failed(_) => OutcomeStatus::Failed,
        }
    }
}

impl Failable for Capture {
    fn failed(repo: &str, err: &LoomError) -> Self {
        Self::Failed(RepoFailure::new(repo, err))
    }
}

/// Snapshot create/restore/list/delete over a [`SnapshotStore`].
#[derive(Debug, Clone)]
pub struct FreezeService {
    git: Arc<GitGateway>,
    store: Arc<dyn SnapshotStore>,
    stash: StashCoordinator,
    pool: WorkerPool,
}

impl FreezeService {
    /// Dirty repositories are stashed through `stash` before a restore, so
    /// the backup carries the coordinator prefix.
    pub fn new(git: Arc<GitGateway>, store: Arc<dyn SnapshotStore>, stash: StashCoordinator) -> Self {
        Self {
            git,
            store,
            stash,
            pool: WorkerPool::default(),
        }
    }

    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    /// Record HEAD sha, branch and dirty flag of every repository.
    ///
    /// Repositories that cannot be read are reported in `per_repo_errors`
    /// and left out. Fails when `repos` is empty or none could be read.
    pub async fn create(&self, repos: &[Repository], name: &str) -> Result<CreateReport> {
        check_name(name)?;
        let this = self.clone();
        let captures = fan_out(&self.pool, repos.to_vec(), |r| r.name.clone(), move |repo| {
            let this = this.clone();
            async move { this.capture(repo).await }
        })
        .await?;

        let mut entries = Vec::new();
        let mut per_repo_errors = Vec::new();
        for capture in captures.results {
            match capture {
                Capture::Captured(entry) => entries.push(entry),
                Capture::Failed(failure) => per_repo_errors.push(failure),
            }
        }
        if entries.is_empty() {
            return Err(LoomError::PartialFailure {
                succeeded: 0,
                failed: per_repo_errors.len(),
            });
        }

        let snapshot = self.save_unique(FreezeSnapshot::new(name, Utc::now(), entries))?;
        log::info!("{} ({} repo(s) failed)", snapshot.describe(), per_repo_errors.len());
        Ok(CreateReport {
            snapshot,
            per_repo_errors,
        })
    }

    /// Save under the derived id, or `<id>_<n>` when an earlier snapshot
    /// with the same name was taken within the same second.
    fn save_unique(&self, mut snapshot: FreezeSnapshot) -> Result<FreezeSnapshot> {
        let base = snapshot.id.clone();
        for n in 1..=MAX_ID_SUFFIX {
            match self.store.save(&snapshot) {
                Err(LoomError::SnapshotExists(id)) => {
                    log::debug!("Snapshot id {} taken, trying suffix {}", id, n);
                    snapshot.id = format!("{}_{}", base, n);
                }
                result => return result.map(|()| snapshot),
            }
        }
        self.store.save(&snapshot)?;
        Ok(snapshot)
    }

    /// Return repositories to the state recorded in a snapshot.
    ///
    /// The snapshot is found by id, or by name taking the newest, and its
    /// content hash is checked first. `only` restricts the restore to the
    /// named repositories.
    pub async fn restore(&self, name_or_id: &str, only: Option<&[String]>) -> Result<RestoreReport> {
        let snapshot = self.store.find(name_or_id)?;
        if !snapshot.verify() {
            return Err(LoomError::SnapshotIntegrity {
                id: snapshot.id.clone(),
                expected: snapshot.content_hash.clone(),
                actual: crate::domain::snapshot::content_hash(&snapshot.entries),
            });
        }

        let entries: Vec<RepoStateEntry> = snapshot
            .entries
            .iter()
            .filter(|e| only.is_none_or(|names| names.iter().any(|n| n == &e.repo_name)))
            .cloned()
            .collect();
        if entries.is_empty() {
            return Err(LoomError::InvalidArgument(format!(
                "No repositories in snapshot {} match the selection",
                snapshot.id
            )));
        }

        log::info!("Restoring {} repo(s) from snapshot {}", entries.len(), snapshot.id);
        let backup_message: Arc<str> = Arc::from(format!("freeze-backup-{}", snapshot.id));
        let this = self.clone();
        let report = fan_out(&self.pool, entries, |e| e.repo_name.clone(), move |entry| {
            let this = this.clone();
            let backup_message = Arc::clone(&backup_message);
            async move { this.restore_entry(entry, &backup_message).await }
        })
        .await?;

        Ok(RestoreReport {
            snapshot_id: snapshot.id,
            snapshot_name: snapshot.name,
            report,
        })
    }

    /// Stored snapshots, newest first.
    pub fn list(&self, filter: &SnapshotFilter) -> Result<Vec<SnapshotSummary>> {
        self.store.summaries(filter)
    }

    /// Delete the snapshot with this id, or every snapshot with this name.
    /// Returns the deleted ids.
    pub fn delete(&self, name_or_id: &str) -> Result<Vec<String>> {
        if self.store.load(name_or_id)?.is_some() {
            self.store.delete(name_or_id)?;
            return Ok(vec![name_or_id.to_string()]);
        }
        let mut deleted = Vec::new();
        for snapshot in self.store.list()?.into_iter().filter(|s| s.name == name_or_id) {
            if self.store.delete(&snapshot.id)? {
                deleted.push(snapshot.id);
            }
        }
        if deleted.is_empty() {
            return Err(LoomError::SnapshotNotFound(name_or_id.to_string()));
        }
        Ok(deleted)
    }

    async fn capture(&self, repo: Repository) -> Result<Capture> {
        let path = repo.validate()?;
        let commit_sha = self.git.head_sha(&path).await?;
        let branch = self.git.current_branch(&path).await?;
        let is_dirty = self.git.is_dirty(&path).await?;
        Ok(Capture::Captured(RepoStateEntry {
            repo_name: repo.name,
            path: path.display().to_string(),
            commit_sha,
            branch,
            is_dirty,
        }))
    }

    async fn restore_entry(&self, entry: RepoStateEntry, backup_message: &str) -> Result<RestoreOutcome> {
        let path = Repository::new(&entry.repo_name, &entry.path).validate()?;
        let previous_sha = self.git.head_sha(&path).await?;
        let previous_branch = self.git.current_branch(&path).await?;

        if previous_sha == entry.commit_sha && previous_branch == entry.branch {
            return Ok(RestoreOutcome::Skipped {
                repo: entry.repo_name,
                reason: "already at snapshot state".to_string(),
            });
        }

        let backup = self.stash.stash_repo(&entry.repo_name, &path, backup_message).await?;

        if entry.is_detached() {
            self.git.checkout(&path, &entry.commit_sha, false).await?;
        } else {
            if previous_branch != entry.branch {
                self.git.checkout(&path, &entry.branch, false).await?;
            }
            if self.git.head_sha(&path).await? != entry.commit_sha {
                self.git.reset_hard(&path, &entry.commit_sha).await?;
            }
        }

        log::info!(
            "Restored {} to {} ({})",
            entry.repo_name,
            &entry.commit_sha[..entry.commit_sha.len().min(8)],
            entry.branch
        );
        Ok(RestoreOutcome::Restored {
            repo: entry.repo_name,
            previous_sha,
            previous_branch,
            commit_sha: entry.commit_sha,
            branch: entry.branch,
            backup_stash: backup.map(|b| b.stash_ref),
        })
    }
}

/// Names become part of file names.
const MAX_ID_SUFFIX: usize = 99;

fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(LoomError::InvalidArgument(format!("Invalid snapshot name: {:?}", name)));
    }
    Ok(())
}
