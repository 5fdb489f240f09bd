//! Repository descriptor supplied by the caller's registry.

use crate::error::{LoomError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A managed repository.
///
/// Identity is the resolved absolute path. The core never owns or mutates
/// these; validity is checked on every use because a working tree can be
/// created or removed on disk between invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
}

impl Repository {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            remote_url: None,
            default_branch: None,
        }
    }

    pub fn with_remote(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = Some(branch.into());
        self
    }

    /// Path with a leading `~` expanded, not touching the filesystem.
    pub fn expanded_path(&self) -> PathBuf {
        expand_home(&self.path)
    }

    /// Resolve the repository to an absolute path and check it is a git
    /// working tree.
    ///
    /// `.git` may be a directory or, for linked worktrees and submodules, a
    /// file pointing at the real git dir.
    pub fn validate(&self) -> Result<PathBuf> {
        let path = self.expanded_path();
        if !path.exists() {
            return Err(LoomError::PathNotFound(path));
        }
        let resolved = path.canonicalize()?;
        if !resolved.join(".git").exists() {
            return Err(LoomError::NotAGitRepository(resolved));
        }
        Ok(resolved)
    }

    /// Whether the repository is currently usable.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}
