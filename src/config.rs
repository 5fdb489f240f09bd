use eyre::{Context, Result, bail};
use loom::domain::Repository;
use loom::git::{Backoff, GitGateway, RetryPolicy};
use loom::pool::WorkerPool;
use loom::services::{BulkExecutor, FreezeService, RepoStatusService, StashCoordinator};
use loom::shell::{SecurityPolicy, ShellGateway, ShellMode};
use loom::storage::FileSnapshotStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub concurrency: ConcurrencyConfig,
    pub shell: ShellConfig,
    pub git: GitConfig,
    pub storage: StorageConfig,
    pub stash: StashConfig,
    pub repos: Vec<Repository>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Repositories processed at once
    pub max_workers: usize,
    /// Shell processes alive at once
    pub max_processes: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            max_processes: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub mode: ShellMode,
    pub default_timeout_ms: u64,
    pub allowed_paths: Vec<PathBuf>,
    pub allowed_commands: Vec<String>,
    pub blocked_commands: Vec<String>,
    pub pipe_targets: Vec<String>,
    pub redirect_paths: Vec<PathBuf>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            mode: ShellMode::Restricted,
            default_timeout_ms: 30000,
            allowed_paths: Vec::new(),
            allowed_commands: Vec::new(),
            blocked_commands: Vec::new(),
            pipe_targets: Vec::new(),
            redirect_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub backoff: Backoff,
    pub max_delay_ms: u64,
    pub timeout_ms: u64,
    pub clone_timeout_ms: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay_ms: 100,
            backoff: Backoff::Exponential,
            max_delay_ms: 5000,
            timeout_ms: 60000,
            clone_timeout_ms: 300000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub snapshots_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshots_dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".loom")
                .join("snapshots"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    pub prefix: String,
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            prefix: loom::domain::stash::DEFAULT_STASH_PREFIX.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            concurrency: ConcurrencyConfig::default(),
            shell: ShellConfig::default(),
            git: GitConfig::default(),
            storage: StorageConfig::default(),
            stash: StashConfig::default(),
            repos: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.check()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.concurrency.max_workers == 0 {
            bail!("concurrency.max_workers must be at least 1");
        }
        if self.concurrency.max_processes == 0 {
            bail!("concurrency.max_processes must be at least 1");
        }
        Ok(())
    }

    pub fn security_policy(&self) -> SecurityPolicy {
        let shell = &self.shell;
        SecurityPolicy::new(shell.mode)
            .allow(&shell.allowed_commands)
            .block(&shell.blocked_commands)
            .with_pipe_targets(&shell.pipe_targets)
            .with_redirect_paths(shell.redirect_paths.iter().cloned())
    }

    pub fn shell_gateway(&self) -> ShellGateway {
        ShellGateway::new(self.security_policy())
            .with_allowed_paths(self.shell.allowed_paths.iter().cloned())
            .with_default_timeout(Duration::from_millis(self.shell.default_timeout_ms))
            .with_max_concurrent(self.concurrency.max_processes)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let git = &self.git;
        let delay = Duration::from_millis(git.retry_delay_ms);
        match git.backoff {
            Backoff::Fixed => RetryPolicy::fixed(git.retry_count, delay),
            Backoff::Exponential => {
                RetryPolicy::exponential(git.retry_count, delay, Duration::from_millis(git.max_delay_ms))
            }
        }
    }

    pub fn git_gateway(&self) -> GitGateway {
        GitGateway::default()
            .with_retry(self.retry_policy())
            .with_default_timeout(Duration::from_millis(self.git.timeout_ms))
            .with_clone_timeout(Duration::from_millis(self.git.clone_timeout_ms))
    }

    pub fn worker_pool(&self) -> WorkerPool {
        WorkerPool::new(self.concurrency.max_workers)
    }

    /// Turn `-r` arguments into repositories. Configured names resolve to
    /// their entry; anything else is a path named after its last component.
    /// No arguments selects every configured repository.
    pub fn select_repos(&self, selectors: &[String]) -> Vec<Repository> {
        if selectors.is_empty() {
            return self.repos.clone();
        }
        selectors
            .iter()
            .map(|s| {
                self.repos.iter().find(|r| &r.name == s).cloned().unwrap_or_else(|| {
                    let path = PathBuf::from(s);
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| s.clone());
                    Repository::new(name, path)
                })
            })
            .collect()
    }
}

/// Everything a command needs, wired from one [`Config`].
pub struct Services {
    pub bulk: BulkExecutor,
    pub status: RepoStatusService,
    pub stash: StashCoordinator,
    pub freeze: FreezeService,
}

impl Services {
    pub fn build(config: &Config) -> Result<Self> {
        let git = Arc::new(config.git_gateway());
        let shell = Arc::new(config.shell_gateway());
        let pool = config.worker_pool();
        let store = FileSnapshotStore::new(loom::domain::repository::expand_home(&config.storage.snapshots_dir))
            .context("Failed to open snapshot store")?;

        let stash = StashCoordinator::new(Arc::clone(&git))
            .with_prefix(&config.stash.prefix)
            .with_pool(pool);
        Ok(Self {
            bulk: BulkExecutor::new(shell, Arc::clone(&git)).with_pool(pool),
            status: RepoStatusService::new(Arc::clone(&git)).with_pool(pool),
            freeze: FreezeService::new(git, Arc::new(store), stash.clone()).with_pool(pool),
            stash,
        })
    }
}
