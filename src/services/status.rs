//! Read-only working tree status across repositories.

use super::fan_out;
use crate::domain::snapshot::DETACHED_HEAD;
use crate::domain::{BulkResult, RepoReading, Repository};
use crate::error::Result;
use crate::git::{GitGateway, RunOptions};
use crate::pool::WorkerPool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Index/worktree codes that mark an unmerged path.
const UNMERGED: &[&str] = &["DD", "AU", "UD", "UA", "DU", "AA", "UU"];

/// Newest commit on HEAD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
}

/// Status of one working tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStatus {
    pub branch: String,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub is_clean: bool,
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
    pub unmerged: Vec<String>,
    pub last_commit: Option<CommitInfo>,
}

/// Parse `git status --porcelain=v1 --branch`.
pub fn parse_porcelain_status(output: &str) -> RepoStatus {
    let mut status = RepoStatus::default();

    for line in output.lines() {
        if let Some(header) = line.strip_prefix("## ") {
            parse_branch_header(header, &mut status);
            continue;
        }
        if line.len() < 4 {
            continue;
        }
        let (code, path) = line.split_at(2);
        let path = path[1..].rsplit(" -> ").next().unwrap_or(&path[1..]).to_string();

        if code == "??" {
            status.untracked.push(path);
            continue;
        }
        if UNMERGED.contains(&code) {
            status.unmerged.push(path);
            continue;
        }
        let mut chars = code.chars();
        let (x, y) = (chars.next().unwrap_or(' '), chars.next().unwrap_or(' '));
        if x != ' ' {
            status.staged.push(path.clone());
        }
        if y != ' ' {
            status.modified.push(path);
        }
    }

    status.is_clean = status.staged.is_empty()
        && status.modified.is_empty()
        && status.untracked.is_empty()
        && status.unmerged.is_empty();
    status
}

/// `main...origin/main [ahead 1, behind 2]`, `No commits yet on main`,
/// `HEAD (no branch)`
fn parse_branch_header(header: &str, status: &mut RepoStatus) {
    let (refs, tracking) = match header.split_once(" [") {
        Some((refs, rest)) => (refs, rest.trim_end_matches(']')),
        None => (header, ""),
    };

    if refs.starts_with("HEAD (no branch)") {
        status.branch = DETACHED_HEAD.to_string();
    } else if let Some(branch) = refs.strip_prefix("No commits yet on ") {
        status.branch = branch.to_string();
    } else if let Some((local, upstream)) = refs.split_once("...") {
        status.branch = local.to_string();
        status.upstream = Some(upstream.to_string());
    } else {
        status.branch = refs.to_string();
    }

    for part in tracking.split(", ") {
        if let Some(n) = part.strip_prefix("ahead ") {
            status.ahead = n.parse().unwrap_or(0);
        } else if let Some(n) = part.strip_prefix("behind ") {
            status.behind = n.parse().unwrap_or(0);
        }
    }
}

/// Collects [`RepoStatus`] for many repositories in parallel.
#[derive(Debug, Clone)]
pub struct RepoStatusService {
    git: Arc<GitGateway>,
    pool: WorkerPool,
}

impl RepoStatusService {
    pub fn new(git: Arc<GitGateway>) -> Self {
        Self {
            git,
            pool: WorkerPool::default(),
        }
    }

    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    pub async fn status_all(&self, repos: &[Repository]) -> Result<BulkResult<RepoReading<RepoStatus>>> {
        let this = self.clone();
        fan_out(&self.pool, repos.to_vec(), |r| r.name.clone(), move |repo| {
            let this = this.clone();
            async move { this.status_one(repo).await }
        })
        .await
    }

    async fn status_one(&self, repo: Repository) -> Result<RepoReading<RepoStatus>> {
        let path = repo.validate()?;
        let out = self.git.status(&path).await?;
        let mut value = parse_porcelain_status(&out.stdout);

        // Fails on a repository without commits.
        let log = self
            .git
            .run(&["log", "-1", "--format=%H%x1f%s"], Some(&path), &RunOptions::unchecked())
            .await?;
        if log.success {
            value.last_commit = log.text().split_once('\u{1f}').map(|(sha, message)| CommitInfo {
                sha: sha.to_string(),
                message: message.to_string(),
            });
        }
        Ok(RepoReading::Read { repo: repo.name, value })
    }
}
