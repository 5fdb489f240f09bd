//! GitGateway runs git with lock-contention retry and typed helpers.

use super::retry::RetryPolicy;
use super::runner::{GitInvocation, GitRunner, ProcessGitRunner};
use super::transient::classify;
use crate::domain::snapshot::DETACHED_HEAD;
use crate::error::{LoomError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Result of a git invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitOutput {
    /// Full command line, `git ...`
    pub command: String,
    pub args: Vec<String>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub return_code: i32,
    /// Attempts made, including retries
    pub attempts: u32,
}

impl GitOutput {
    /// Stdout with surrounding whitespace removed.
    pub fn text(&self) -> &str {
        self.stdout.trim()
    }
}

/// Per-call options for [`GitGateway::run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Turn a non-zero exit into `GitCommand`
    pub check: bool,
    /// Overrides the gateway's policy
    pub retry: Option<RetryPolicy>,
    /// Overrides the gateway's default timeout
    pub timeout: Option<Duration>,
    pub input: Option<String>,
    pub env: Vec<(String, String)>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            check: true,
            retry: None,
            timeout: None,
            input: None,
            env: Vec::new(),
        }
    }
}

impl RunOptions {
    /// Return non-zero exits as output instead of an error.
    pub fn unchecked() -> Self {
        Self {
            check: false,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Gateway for git commands.
///
/// Git subcommands are a fixed, trusted set, so no policy screening
/// happens here. Failures whose stderr shows lock contention are retried
/// according to the [`RetryPolicy`]; everything else surfaces immediately.
#[derive(Debug, Clone)]
pub struct GitGateway {
    runner: Arc<dyn GitRunner>,
    retry: RetryPolicy,
    default_timeout: Duration,
    clone_timeout: Duration,
}

impl Default for GitGateway {
    fn default() -> Self {
        Self::new(Arc::new(ProcessGitRunner::default()))
    }
}

impl GitGateway {
    pub fn new(runner: Arc<dyn GitRunner>) -> Self {
        Self {
            runner,
            retry: RetryPolicy::default(),
            default_timeout: Duration::from_secs(60),
            clone_timeout: Duration::from_secs(300),
        }
    }

    /// Gateway over the first git executable that answers `--version`.
    pub async fn discover() -> Result<Self> {
        Ok(Self::new(Arc::new(ProcessGitRunner::discover().await?)))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_clone_timeout(mut self, timeout: Duration) -> Self {
        self.clone_timeout = timeout;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Run `git <args>` in `cwd`.
    ///
    /// Transient failures are retried; a timeout is returned as
    /// `TimeoutExceeded` without retrying. With `check` set, a final
    /// non-zero exit becomes `GitCommand`.
    pub async fn run<S: AsRef<str>>(&self, args: &[S], cwd: Option<&Path>, options: &RunOptions) -> Result<GitOutput> {
        let invocation = GitInvocation {
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
            cwd: cwd.map(Path::to_path_buf),
            env: options.env.clone(),
            input: options.input.clone(),
            timeout: options.timeout.unwrap_or(self.default_timeout),
        };
        let command = invocation.display();
        let policy = options.retry.unwrap_or(self.retry);

        let mut attempt = 1;
        loop {
            log::debug!("Running {} (attempt {})", command, attempt);
            let raw = self.runner.run(&invocation).await?;
            let success = raw.return_code == 0;

            if !success && attempt < policy.max_attempts() && classify(&raw.stderr).is_transient() {
                policy.wait(attempt, &command).await;
                attempt += 1;
                continue;
            }

            if !success && options.check {
                return Err(LoomError::GitCommand {
                    command,
                    return_code: raw.return_code,
                    stdout: raw.stdout,
                    stderr: raw.stderr,
                });
            }
            return Ok(GitOutput {
                command,
                args: invocation.args,
                success,
                stdout: raw.stdout,
                stderr: raw.stderr,
                return_code: raw.return_code,
                attempts: attempt,
            });
        }
    }

    async fn checked(&self, args: &[&str], cwd: &Path) -> Result<GitOutput> {
        self.run(args, Some(cwd), &RunOptions::default()).await
    }

    /// `git status --porcelain=v1 --branch`
    pub async fn status(&self, cwd: &Path) -> Result<GitOutput> {
        self.checked(&["status", "--porcelain=v1", "--branch"], cwd).await
    }

    /// List branches, or create `name` when given.
    pub async fn branch(&self, cwd: &Path, name: Option<&str>) -> Result<GitOutput> {
        match name {
            Some(name) => self.checked(&["branch", name], cwd).await,
            None => self.checked(&["branch", "--list"], cwd).await,
        }
    }

    /// Last `max_count` commits, one per line, in `format` (default
    /// `%H %s`).
    pub async fn log(&self, cwd: &Path, max_count: usize, format: Option<&str>) -> Result<GitOutput> {
        let count = format!("--max-count={}", max_count);
        let format = format!("--format={}", format.unwrap_or("%H %s"));
        self.checked(&["log", count.as_str(), format.as_str()], cwd).await
    }

    /// `git diff <args>`
    pub async fn diff(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput> {
        let mut full = vec!["diff"];
        full.extend_from_slice(args);
        self.checked(&full, cwd).await
    }

    /// `git stash <args>`
    pub async fn stash(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput> {
        let mut full = vec!["stash"];
        full.extend_from_slice(args);
        self.checked(&full, cwd).await
    }

    /// Stage `paths`, or everything when empty.
    pub async fn add(&self, cwd: &Path, paths: &[&str]) -> Result<GitOutput> {
        let mut full = vec!["add"];
        if paths.is_empty() {
            full.push("-A");
        } else {
            full.push("--");
            full.extend_from_slice(paths);
        }
        self.checked(&full, cwd).await
    }

    pub async fn commit(&self, cwd: &Path, message: &str, all: bool) -> Result<GitOutput> {
        let mut full = vec!["commit", "-m", message];
        if all {
            full.push("-a");
        }
        self.checked(&full, cwd).await
    }

    pub async fn push(&self, cwd: &Path, remote: Option<&str>, branch: Option<&str>) -> Result<GitOutput> {
        let mut full = vec!["push"];
        full.extend(remote);
        full.extend(branch);
        self.checked(&full, cwd).await
    }

    pub async fn pull(&self, cwd: &Path, remote: Option<&str>, branch: Option<&str>) -> Result<GitOutput> {
        let mut full = vec!["pull"];
        full.extend(remote);
        full.extend(branch);
        self.checked(&full, cwd).await
    }

    /// Clone `url` into `dest`, bounded by the clone timeout.
    pub async fn clone_repo(&self, url: &str, dest: &Path, branch: Option<&str>) -> Result<GitOutput> {
        let dest_str = dest.to_string_lossy();
        let mut full = vec!["clone"];
        if let Some(branch) = branch {
            full.extend(["--branch", branch]);
        }
        full.extend([url, &*dest_str]);
        let options = RunOptions::default().with_timeout(self.clone_timeout);
        self.run(&full, None, &options).await
    }

    /// Check out `target`, creating it as a new branch when `create` is set.
    pub async fn checkout(&self, cwd: &Path, target: &str, create: bool) -> Result<GitOutput> {
        if create {
            self.checked(&["checkout", "-b", target], cwd).await
        } else {
            self.checked(&["checkout", target], cwd).await
        }
    }

    /// `git remote -v`
    pub async fn remote(&self, cwd: &Path) -> Result<GitOutput> {
        self.checked(&["remote", "-v"], cwd).await
    }

    /// Full sha of HEAD.
    pub async fn head_sha(&self, cwd: &Path) -> Result<String> {
        Ok(self.checked(&["rev-parse", "HEAD"], cwd).await?.text().to_string())
    }

    /// Current branch name, or `HEAD` when detached.
    pub async fn current_branch(&self, cwd: &Path) -> Result<String> {
        let out = self.checked(&["rev-parse", "--abbrev-ref", "HEAD"], cwd).await?;
        let branch = out.text();
        if branch.is_empty() {
            Ok(DETACHED_HEAD.to_string())
        } else {
            Ok(branch.to_string())
        }
    }

    /// Uncommitted changes, untracked files included.
    pub async fn is_dirty(&self, cwd: &Path) -> Result<bool> {
        let out = self.checked(&["status", "--porcelain"], cwd).await?;
        Ok(!out.text().is_empty())
    }

    pub async fn reset_hard(&self, cwd: &Path, sha: &str) -> Result<GitOutput> {
        self.checked(&["reset", "--hard", sha], cwd).await
    }
}
