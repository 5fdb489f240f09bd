//! Fan an operation out across repositories.

use crate::domain::{BulkResult, ExecutionResult, Repository};
use crate::error::{LoomError, Result};
use crate::git::GitGateway;
use crate::operation::{ExecutionTask, GitOperation, Operation, OperationContext, ShellOperation};
use crate::pool::WorkerPool;
use crate::shell::ShellGateway;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Runs one operation per repository through the worker pool.
#[derive(Debug, Clone)]
pub struct BulkExecutor {
    ctx: OperationContext,
    pool: WorkerPool,
}

impl BulkExecutor {
    pub fn new(shell: Arc<ShellGateway>, git: Arc<GitGateway>) -> Self {
        Self {
            ctx: OperationContext::new(shell, git),
            pool: WorkerPool::default(),
        }
    }

    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn context(&self) -> &OperationContext {
        &self.ctx
    }

    /// Run a shell command in every repository.
    pub async fn run_shell(
        &self,
        repos: &[Repository],
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<BulkResult<ExecutionResult>> {
        self.run_operation(repos, Arc::new(ShellOperation::new(command)), timeout)
            .await
    }

    /// Run `git <args>` in every repository.
    pub async fn run_git<S: AsRef<str>>(
        &self,
        repos: &[Repository],
        args: &[S],
        timeout: Option<Duration>,
    ) -> Result<BulkResult<ExecutionResult>> {
        let op = GitOperation::new(args.iter().map(|a| a.as_ref().to_string()));
        self.run_operation(repos, Arc::new(op), timeout).await
    }

    /// Validate `operation` once, then run it in every repository.
    ///
    /// Errors only for an empty repository list, an invalid operation or an
    /// invalid pool; everything that goes wrong inside a repository is a
    /// failed entry in the report.
    pub async fn run_operation(
        &self,
        repos: &[Repository],
        operation: Arc<dyn Operation>,
        timeout: Option<Duration>,
    ) -> Result<BulkResult<ExecutionResult>> {
        if repos.is_empty() {
            return Err(LoomError::NoRepositories);
        }
        operation.validate(&self.ctx)?;

        let started = Instant::now();
        log::info!(
            "Running {} '{}' across {} repositories",
            operation.name(),
            operation.command(),
            repos.len()
        );

        let tasks: Vec<ExecutionTask> = repos
            .iter()
            .map(|repo| ExecutionTask::new(repo.clone(), Arc::clone(&operation)).with_timeout(timeout))
            .collect();

        let ctx = self.ctx.clone();
        let outcomes = self
            .pool
            .run(tasks, move |task| {
                let ctx = ctx.clone();
                async move { Ok::<_, LoomError>(task.run(&ctx).await) }
            })
            .await?;

        let command = operation.command();
        let results = outcomes
            .into_iter()
            .zip(repos)
            .map(|(outcome, repo)| {
                outcome.unwrap_or_else(|e| {
                    ExecutionResult::failure(
                        &repo.name,
                        repo.expanded_path().display().to_string(),
                        &command,
                        &e,
                        started.elapsed(),
                    )
                })
            })
            .collect();

        let report = BulkResult::since(results, started);
        log::info!(
            "{} finished: {} succeeded, {} failed in {}ms",
            operation.name(),
            report.succeeded_count,
            report.failed_count,
            report.total_duration_ms
        );
        Ok(report)
    }
}
