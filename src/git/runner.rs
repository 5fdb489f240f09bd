//! The seam between retry orchestration and the git process.

use crate::error::{LoomError, Result};
use crate::shell::{ProcessTable, drain, read_all};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Where the git binary is looked for, in order.
const GIT_CANDIDATES: &[&str] = &["git", "/usr/bin/git", "/usr/local/bin/git"];

/// One git invocation, fully described.
#[derive(Debug, Clone, Default)]
pub struct GitInvocation {
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub input: Option<String>,
    pub timeout: Duration,
}

impl GitInvocation {
    /// `git arg1 arg2 ...` as shown in logs and errors.
    pub fn display(&self) -> String {
        std::iter::once("git")
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What a finished git process produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawOutput {
    /// -1 when killed by a signal
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs a single git invocation. Implementations must return
/// `TimeoutExceeded` when `invocation.timeout` elapses.
#[async_trait]
pub trait GitRunner: Send + Sync + std::fmt::Debug {
    async fn run(&self, invocation: &GitInvocation) -> Result<RawOutput>;
}

/// Spawns the real git binary.
///
/// Each git process leads its own process group. The group is killed on
/// timeout and when the `run` future is dropped early, which takes down
/// hooks, editors and credential helpers git started.
#[derive(Debug, Clone)]
pub struct ProcessGitRunner {
    program: PathBuf,
    processes: ProcessTable,
}

impl Default for ProcessGitRunner {
    fn default() -> Self {
        Self::new("git")
    }
}

impl ProcessGitRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            processes: ProcessTable::default(),
        }
    }

    /// Try the usual locations with `--version` and use the first that
    /// answers.
    pub async fn discover() -> Result<Self> {
        for candidate in GIT_CANDIDATES {
            let status = Command::new(candidate)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if matches!(status, Ok(status) if status.success()) {
                log::debug!("Using git executable: {}", candidate);
                return Ok(Self::new(*candidate));
            }
        }
        Err(LoomError::PathNotFound(PathBuf::from("git")))
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// Git processes currently running.
    pub fn active_count(&self) -> usize {
        self.processes.len()
    }
}

#[async_trait]
impl GitRunner for ProcessGitRunner {
    async fn run(&self, invocation: &GitInvocation) -> Result<RawOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&invocation.args)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(if invocation.input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        let mut guard = self.processes.register(child.id());
        if let (Some(data), Some(mut stdin)) = (invocation.input.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                let _ = stdin.write_all(data.as_bytes()).await;
            });
        }
        let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_all(s)));
        let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_all(s)));

        let status = match tokio::time::timeout(invocation.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                guard.kill();
                let _ = child.start_kill();
                let _ = child.wait().await;
                guard.reaped();
                for task in [stdout_task, stderr_task].into_iter().flatten() {
                    task.abort();
                }
                return Err(LoomError::TimeoutExceeded {
                    command: invocation.display(),
                    timeout: invocation.timeout,
                });
            }
        };
        guard.reaped();

        Ok(RawOutput {
            return_code: status.code().unwrap_or(-1),
            stdout: drain(stdout_task).await,
            stderr: drain(stderr_task).await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_display() {
        let inv = GitInvocation {
            args: vec!["log".into(), "-n".into(), "1".into()],
            ..Default::default()
        };
        assert_eq!(inv.display(), "git log -n 1");
    }

    #[tokio::test]
    async fn test_discover_finds_git() {
        let runner = ProcessGitRunner::discover().await.unwrap();
        assert!(runner.program().to_string_lossy().ends_with("git"));
    }

    #[tokio::test]
    async fn test_run_version() {
        let runner = ProcessGitRunner::default();
        let inv = GitInvocation {
            args: vec!["--version".into()],
            timeout: Duration::from_secs(10),
            ..Default::default()
        };
        let out = runner.run(&inv).await.unwrap();
        assert_eq!(out.return_code, 0);
        assert!(out.stdout.starts_with("git version"));
    }

    #[tokio::test]
    async fn test_run_reports_failure_code() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = ProcessGitRunner::default();
        let inv = GitInvocation {
            args: vec!["rev-parse".into(), "HEAD".into()],
            cwd: Some(dir.path().to_path_buf()),
            env: vec![(
                "GIT_CEILING_DIRECTORIES".into(),
                dir.path().parent().unwrap().display().to_string(),
            )],
            timeout: Duration::from_secs(10),
            ..Default::default()
        };
        let out = runner.run(&inv).await.unwrap();
        assert_ne!(out.return_code, 0);
        assert!(out.stderr.contains("not a git repository"));
    }

    #[tokio::test]
    async fn test_timeout_reaps_process_group() {
        let (temp, repo) = crate::git::fixture::setup_test_repo();
        let marker = temp.path().join("late.txt");
        let runner = ProcessGitRunner::default();
        let inv = GitInvocation {
            args: vec!["commit".into(), "--allow-empty".into()],
            cwd: Some(repo),
            env: vec![(
                "GIT_EDITOR".into(),
                format!("sh -c 'sleep 1 && touch {}' & sleep 30; true", marker.display()),
            )],
            timeout: Duration::from_millis(300),
            ..Default::default()
        };

        let err = runner.run(&inv).await.unwrap_err();
        assert!(matches!(err, LoomError::TimeoutExceeded { .. }));
        assert_eq!(runner.active_count(), 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_dropped_run_kills_process_group() {
        let (temp, repo) = crate::git::fixture::setup_test_repo();
        let marker = temp.path().join("late.txt");
        let runner = ProcessGitRunner::default();
        let inv = GitInvocation {
            args: vec!["commit".into(), "--allow-empty".into()],
            cwd: Some(repo),
            env: vec![(
                "GIT_EDITOR".into(),
                format!("sh -c 'sleep 1 && touch {}' & sleep 30; true", marker.display()),
            )],
            timeout: Duration::from_secs(60),
            ..Default::default()
        };

        // The caller gives up long before the runner's own timeout.
        let abandoned = tokio::time::timeout(Duration::from_millis(300), runner.run(&inv)).await;
        assert!(abandoned.is_err());
        assert_eq!(runner.active_count(), 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }
}
