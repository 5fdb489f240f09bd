//! ShellGateway runs validated shell commands with timeouts and a cap on
//! simultaneous processes.

use super::policy::SecurityPolicy;
use super::process::{ProcessTable, drain, read_all};
use super::validator;
use crate::domain::repository::expand_home;
use crate::error::{LoomError, Result};
use crate::pool::ConcurrencyBudget;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// A single command to run.
#[derive(Debug, Clone)]
pub struct ShellRequest {
    /// Passed to `sh -c`
    pub command: String,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Falls back to the gateway default
    pub timeout: Option<Duration>,
    /// Written to stdin, which is then closed
    pub input: Option<String>,
    pub check_security: bool,
}

impl ShellRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
            input: None,
            check_security: true,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn input(mut self, data: impl Into<String>) -> Self {
        self.input = Some(data.into());
        self
    }

    /// Skip policy validation. Path confinement still applies.
    pub fn unchecked(mut self) -> Self {
        self.check_security = false;
        self
    }
}

/// Output of a process that ran to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellOutput {
    pub command: String,
    /// None when the process was killed by a signal
    pub return_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub success: bool,
    pub pid: Option<u32>,
}

/// Output of [`ShellGateway::execute_pipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub output: ShellOutput,
    /// 1-based index of the stage that failed
    pub failed_stage: Option<usize>,
    pub stages_run: usize,
}

/// Gateway for validated shell execution.
///
/// Every command is screened by the gateway's [`SecurityPolicy`] and
/// confined to `allowed_paths` before a process exists. Each process runs
/// in its own process group so a timeout or [`ShellGateway::kill_all`]
/// takes its descendants down with it.
#[derive(Debug)]
pub struct ShellGateway {
    policy: Arc<SecurityPolicy>,
    allowed_paths: Vec<PathBuf>,
    default_timeout: Duration,
    budget: ConcurrencyBudget,
    processes: ProcessTable,
    spawned: AtomicUsize,
}

impl Default for ShellGateway {
    fn default() -> Self {
        Self::new(SecurityPolicy::default())
    }
}

impl ShellGateway {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            allowed_paths: Vec::new(),
            default_timeout: Duration::from_secs(30),
            budget: ConcurrencyBudget::new(10),
            processes: ProcessTable::default(),
            spawned: AtomicUsize::new(0),
        }
    }

    /// Confine working directories to these roots. Paths are resolved now;
    /// roots that do not exist are kept as given.
    pub fn with_allowed_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.allowed_paths = paths
            .into_iter()
            .map(|p| {
                let p = expand_home(&p.into());
                p.canonicalize().unwrap_or(p)
            })
            .collect();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Cap on simultaneously live processes.
    pub fn with_max_concurrent(mut self, limit: usize) -> Self {
        self.budget = ConcurrencyBudget::new(limit);
        self
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn max_concurrent(&self) -> usize {
        self.budget.limit()
    }

    /// Processes currently running.
    pub fn active_count(&self) -> usize {
        self.processes.len()
    }

    /// Processes spawned over this gateway's lifetime.
    pub fn spawned_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Run one command.
    ///
    /// Errors: `SecurityViolation` if the policy rejects it,
    /// `PermissionDenied` if the working directory is outside the allowed
    /// paths, `TimeoutExceeded` if it ran too long (the process group is
    /// killed). A non-zero exit is not an error; check `success`.
    pub async fn execute(&self, request: &ShellRequest) -> Result<ShellOutput> {
        let cwd = self.preflight(request)?;
        let _permit = self.budget.acquire().await?;
        self.run_process(request, cwd.as_deref(), request.input.as_deref()).await
    }

    /// Run several commands concurrently, bounded by the gateway's budget.
    /// Results are in input order; each request fails on its own.
    pub async fn execute_many(&self, requests: &[ShellRequest]) -> Vec<Result<ShellOutput>> {
        futures::future::join_all(requests.iter().map(|r| self.execute(r))).await
    }

    /// Run stages in sequence, feeding each stage's stdout to the next
    /// stage's stdin.
    ///
    /// Every stage is validated before the first one starts. A stage that
    /// exits non-zero stops the pipeline and is reported in `failed_stage`.
    pub async fn execute_pipeline(&self, stages: &[ShellRequest]) -> Result<PipelineOutput> {
        if stages.is_empty() {
            return Err(LoomError::InvalidArgument("No commands provided for pipeline".to_string()));
        }
        let cwds = stages
            .iter()
            .map(|s| self.preflight(s))
            .collect::<Result<Vec<_>>>()?;

        let started = Instant::now();
        let joined = stages.iter().map(|s| s.command.as_str()).collect::<Vec<_>>().join(" | ");
        let mut carried = stages[0].input.clone();

        for (i, (stage, cwd)) in stages.iter().zip(&cwds).enumerate() {
            let output = {
                let _permit = self.budget.acquire().await?;
                self.run_process(stage, cwd.as_deref(), carried.as_deref()).await?
            };

            if !output.success {
                log::info!("Pipeline failed at stage {}: {}", i + 1, stage.command);
                return Ok(PipelineOutput {
                    output: ShellOutput {
                        command: joined,
                        return_code: output.return_code,
                        stdout: output.stdout,
                        stderr: format!("Pipeline failed at stage {}: {}", i + 1, output.stderr),
                        duration_ms: started.elapsed().as_millis() as u64,
                        success: false,
                        pid: output.pid,
                    },
                    failed_stage: Some(i + 1),
                    stages_run: i + 1,
                });
            }
            carried = Some(output.stdout);
        }

        Ok(PipelineOutput {
            output: ShellOutput {
                command: joined,
                return_code: Some(0),
                stdout: carried.unwrap_or_default(),
                stderr: String::new(),
                duration_ms: started.elapsed().as_millis() as u64,
                success: true,
                pid: None,
            },
            failed_stage: None,
            stages_run: stages.len(),
        })
    }

    /// Kill every live process group. Returns how many were signalled.
    pub fn kill_all(&self) -> usize {
        let killed = self.processes.kill_all();
        if killed > 0 {
            log::warn!("Killed {} running process group(s)", killed);
        }
        killed
    }

    /// Kill everything still running; used on shutdown.
    pub fn shutdown(&self) -> usize {
        log::info!("Shutting down shell gateway");
        self.kill_all()
    }

    /// `git <args>` through the gateway's policy.
    pub async fn git(&self, args: &str, cwd: Option<&Path>) -> Result<ShellOutput> {
        let mut request = ShellRequest::new(format!("git {}", args));
        if let Some(dir) = cwd {
            request = request.cwd(dir);
        }
        self.execute(&request).await
    }

    /// Validation done before any process exists. Returns the resolved cwd.
    fn preflight(&self, request: &ShellRequest) -> Result<Option<PathBuf>> {
        if request.check_security {
            validator::validate(&request.command, &self.policy)?;
        }
        match &request.cwd {
            Some(cwd) => self.check_cwd(cwd).map(Some),
            None if !self.allowed_paths.is_empty() => {
                let current = std::env::current_dir()?;
                self.check_cwd(&current).map(Some)
            }
            None => Ok(None),
        }
    }

    fn check_cwd(&self, cwd: &Path) -> Result<PathBuf> {
        let expanded = expand_home(cwd);
        if !expanded.exists() {
            return Err(LoomError::PathNotFound(expanded));
        }
        let resolved = expanded.canonicalize()?;
        if !self.allowed_paths.is_empty() && !self.allowed_paths.iter().any(|root| resolved.starts_with(root)) {
            return Err(LoomError::PermissionDenied(format!(
                "Working directory {} is outside allowed directories",
                resolved.display()
            )));
        }
        Ok(resolved)
    }

    async fn run_process(&self, request: &ShellRequest, cwd: Option<&Path>, input: Option<&str>) -> Result<ShellOutput> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&request.command)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let pid = child.id();
        let mut guard = self.processes.register(pid);
        log::debug!("Spawned pid {:?}: {}", pid, request.command);

        if let (Some(data), Some(mut stdin)) = (input, child.stdin.take()) {
            let data = data.to_owned();
            tokio::spawn(async move {
                // The child may exit without reading; a broken pipe is fine.
                let _ = stdin.write_all(data.as_bytes()).await;
            });
        }
        let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_all(s)));
        let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_all(s)));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                guard.kill();
                let _ = child.start_kill();
                let _ = child.wait().await;
                guard.reaped();
                for task in [stdout_task, stderr_task].into_iter().flatten() {
                    task.abort();
                }
                log::warn!("Command timed out after {:?}: {}", timeout, request.command);
                return Err(LoomError::TimeoutExceeded {
                    command: request.command.clone(),
                    timeout,
                });
            }
        };
        guard.reaped();

        let stdout = drain(stdout_task).await;
        let stderr = drain(stderr_task).await;
        let return_code = status.code();

        Ok(ShellOutput {
            command: request.command.clone(),
            return_code,
            stdout,
            stderr,
            duration_ms: started.elapsed().as_millis() as u64,
            success: return_code == Some(0),
            pid,
        })
    }
}
