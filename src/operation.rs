//! Operations that can be fanned out across repositories.
//!
//! An [`Operation`] is validated once, then executed once per repository
//! inside an [`ExecutionTask`]. Built-in operations are looked up by name in
//! [`OperationRegistry::builtin`].

use crate::domain::{ExecutionResult, Repository};
use crate::error::{LoomError, Result};
use crate::git::{GitGateway, RunOptions};
use crate::shell::{ShellGateway, ShellRequest, validate};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Gateways available to an operation.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub shell: Arc<ShellGateway>,
    pub git: Arc<GitGateway>,
}

impl OperationContext {
    pub fn new(shell: Arc<ShellGateway>, git: Arc<GitGateway>) -> Self {
        Self { shell, git }
    }
}

/// Raw output of one operation run in one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Something that can run in a repository.
#[async_trait]
pub trait Operation: Send + Sync + std::fmt::Debug {
    /// Registry name, e.g. `shell`
    fn name(&self) -> &str;

    /// Command line recorded in results.
    fn command(&self) -> String;

    /// Reject the operation before anything is spawned.
    fn validate(&self, ctx: &OperationContext) -> Result<()>;

    /// Run in `cwd`. A non-zero exit is output, not an error.
    async fn execute(&self, ctx: &OperationContext, cwd: &Path, timeout: Option<Duration>) -> Result<OperationOutput>;
}

/// One dispatch of an operation against one repository.
#[derive(Debug, Clone)]
pub struct ExecutionTask {
    pub repository: Repository,
    pub operation: Arc<dyn Operation>,
    pub timeout: Option<Duration>,
    pub working_dir_override: Option<PathBuf>,
}

impl ExecutionTask {
    pub fn new(repository: Repository, operation: Arc<dyn Operation>) -> Self {
        Self {
            repository,
            operation,
            timeout: None,
            working_dir_override: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run somewhere other than the repository root.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir_override = Some(dir.into());
        self
    }

    /// Validate the repository, run the operation, and record the outcome.
    /// Never fails; errors become a failed result.
    pub async fn run(self, ctx: &OperationContext) -> ExecutionResult {
        let started = Instant::now();
        let command = self.operation.command();
        let name = self.repository.name.clone();
        let path = self.repository.expanded_path().display().to_string();

        let outcome = async {
            let root = self.repository.validate()?;
            let cwd = match &self.working_dir_override {
                Some(dir) if dir.is_absolute() => dir.clone(),
                Some(dir) => root.join(dir),
                None => root,
            };
            self.operation.execute(ctx, &cwd, self.timeout).await
        }
        .await;

        match outcome {
            Ok(out) => {
                ExecutionResult::completed(name, path, command, out.exit_code, out.stdout, out.stderr, started.elapsed())
            }
            Err(e) => {
                log::debug!("{} failed in {}: {}", command, name, e);
                ExecutionResult::failure(name, path, command, &e, started.elapsed())
            }
        }
    }
}

/// Run a shell command through the shell gateway.
#[derive(Debug, Clone)]
pub struct ShellOperation {
    command: String,
}

impl ShellOperation {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Operation for ShellOperation {
    fn name(&self) -> &str {
        "shell"
    }

    fn command(&self) -> String {
        self.command.clone()
    }

    fn validate(&self, ctx: &OperationContext) -> Result<()> {
        validate(&self.command, ctx.shell.policy())
    }

    async fn execute(&self, ctx: &OperationContext, cwd: &Path, timeout: Option<Duration>) -> Result<OperationOutput> {
        let mut request = ShellRequest::new(&self.command).cwd(cwd);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let out = ctx.shell.execute(&request).await?;
        Ok(OperationOutput {
            exit_code: out.return_code,
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }
}

/// Run `git <args>` through the git gateway.
#[derive(Debug, Clone)]
pub struct GitOperation {
    args: Vec<String>,
}

impl GitOperation {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Operation for GitOperation {
    fn name(&self) -> &str {
        "git"
    }

    fn command(&self) -> String {
        std::iter::once("git")
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn validate(&self, _ctx: &OperationContext) -> Result<()> {
        if self.args.is_empty() {
            return Err(LoomError::InvalidArgument("git operation needs arguments".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &OperationContext, cwd: &Path, timeout: Option<Duration>) -> Result<OperationOutput> {
        let mut options = RunOptions::unchecked();
        options.timeout = timeout;
        let out = ctx.git.run(self.args.as_slice(), Some(cwd), &options).await?;
        Ok(OperationOutput {
            exit_code: Some(out.return_code),
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }
}

/// A named constructor for a built-in operation.
#[derive(Debug, Clone, Copy)]
pub struct OperationEntry {
    pub name: &'static str,
    pub summary: &'static str,
    build: fn(&[String]) -> Result<Arc<dyn Operation>>,
}

/// A single argument is taken as a complete command line. Several arguments
/// are an argv and each one is quoted for `sh`.
fn build_shell(args: &[String]) -> Result<Arc<dyn Operation>> {
    let command = match args {
        [] => return Err(LoomError::InvalidArgument("shell operation needs a command".to_string())),
        [line] => line.clone(),
        words => shlex::try_join(words.iter().map(String::as_str))
            .map_err(|e| LoomError::InvalidArgument(format!("Cannot quote shell arguments: {}", e)))?,
    };
    Ok(Arc::new(ShellOperation::new(command)))
}

fn build_git(args: &[String]) -> Result<Arc<dyn Operation>> {
    if args.is_empty() {
        return Err(LoomError::InvalidArgument("git operation needs arguments".to_string()));
    }
    Ok(Arc::new(GitOperation::new(args.iter().cloned())))
}

static BUILTIN: &[OperationEntry] = &[
    OperationEntry {
        name: "shell",
        summary: "Run a validated shell command in each repository",
        build: build_shell,
    },
    OperationEntry {
        name: "git",
        summary: "Run git with the given arguments in each repository",
        build: build_git,
    },
];

/// Lookup table of operations by name.
#[derive(Debug, Clone, Copy)]
pub struct OperationRegistry {
    entries: &'static [OperationEntry],
}

impl OperationRegistry {
    /// The built-in `shell` and `git` operations.
    pub fn builtin() -> Self {
        Self { entries: BUILTIN }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        self.entries.iter().map(|e| e.name)
    }

    pub fn get(&self, name: &str) -> Option<&'static OperationEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Build the operation `name` from its arguments.
    pub fn create(&self, name: &str, args: &[String]) -> Result<Arc<dyn Operation>> {
        let entry = self
            .get(name)
            .ok_or_else(|| LoomError::InvalidArgument(format!("Unknown operation: {}", name)))?;
        (entry.build)(args)
    }
}
