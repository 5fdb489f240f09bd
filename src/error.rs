//! Error types for Loom
//!
//! Centralized error handling using thiserror. Every variant maps onto an
//! [`ErrorKind`] so per-repository failures can be carried inside reports.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All error types that can occur in Loom
#[derive(Debug, Error)]
pub enum LoomError {
    /// Command rejected by the security policy
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// Working directory outside the allowed paths
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Process exceeded its wall-clock budget and was killed
    #[error("Timed out after {}ms: {command}", .timeout.as_millis())]
    TimeoutExceeded { command: String, timeout: Duration },

    /// Git exited non-zero with a non-transient failure
    #[error("Git command failed with return code {return_code}: {command}: {}", .stderr.trim())]
    GitCommand {
        command: String,
        return_code: i32,
        stdout: String,
        stderr: String,
    },

    /// Stash pop left conflict markers in the working tree
    #[error("Conflict during restore in {repo}: {detail}")]
    ConflictDuringRestore { repo: String, detail: String },

    /// Some repositories in a bulk operation failed
    #[error("Partial failure: {succeeded} succeeded, {failed} failed")]
    PartialFailure { succeeded: usize, failed: usize },

    /// Repository path does not exist
    #[error("Repository path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    /// Path exists but holds no git metadata
    #[error("Not a git repository: {}", .0.display())]
    NotAGitRepository(PathBuf),

    /// Snapshot lookup failed
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// A snapshot with this id is already stored
    #[error("Snapshot already exists: {0}")]
    SnapshotExists(String),

    /// Stored snapshot no longer matches its content hash
    #[error("Snapshot integrity check failed for {id}: expected {expected}, found {actual}")]
    SnapshotIntegrity {
        id: String,
        expected: String,
        actual: String,
    },

    /// Caller supplied an empty repository list
    #[error("No repositories given")]
    NoRepositories,

    /// Caller supplied an invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A worker task panicked or was cancelled
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializable classification of a [`LoomError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SecurityViolation,
    PermissionDenied,
    TimeoutExceeded,
    GitCommand,
    ConflictDuringRestore,
    PartialFailure,
    PathNotFound,
    NotAGitRepository,
    SnapshotNotFound,
    SnapshotExists,
    SnapshotIntegrity,
    InvalidArgument,
    TaskFailed,
    Storage,
    Io,
}

impl LoomError {
    /// Classify this error for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SecurityViolation(_) => ErrorKind::SecurityViolation,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::TimeoutExceeded { .. } => ErrorKind::TimeoutExceeded,
            Self::GitCommand { .. } => ErrorKind::GitCommand,
            Self::ConflictDuringRestore { .. } => ErrorKind::ConflictDuringRestore,
            Self::PartialFailure { .. } => ErrorKind::PartialFailure,
            Self::PathNotFound(_) => ErrorKind::PathNotFound,
            Self::NotAGitRepository(_) => ErrorKind::NotAGitRepository,
            Self::SnapshotNotFound(_) => ErrorKind::SnapshotNotFound,
            Self::SnapshotExists(_) => ErrorKind::SnapshotExists,
            Self::SnapshotIntegrity { .. } => ErrorKind::SnapshotIntegrity,
            Self::NoRepositories | Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::TaskFailed(_) => ErrorKind::TaskFailed,
            Self::Storage(_) | Self::Json(_) => ErrorKind::Storage,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// Result type alias for Loom operations
pub type Result<T> = std::result::Result<T, LoomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_violation_error() {
        let err = LoomError::SecurityViolation("Command 'rm' is not allowed".to_string());
        assert_eq!(err.to_string(), "Security violation: Command 'rm' is not allowed");
        assert_eq!(err.kind(), ErrorKind::SecurityViolation);
    }

    #[test]
    fn test_timeout_error_display() {
        let err = LoomError::TimeoutExceeded {
            command: "sleep 10".to_string(),
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "Timed out after 250ms: sleep 10");
        assert_eq!(err.kind(), ErrorKind::TimeoutExceeded);
    }

    #[test]
    fn test_git_command_error_trims_stderr() {
        let err = LoomError::GitCommand {
            command: "git status".to_string(),
            return_code: 128,
            stdout: String::new(),
            stderr: "fatal: not a git repository\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Git command failed with return code 128: git status: fatal: not a git repository"
        );
    }

    #[test]
    fn test_path_not_found_error() {
        let err = LoomError::PathNotFound(PathBuf::from("/tmp/missing"));
        assert_eq!(err.to_string(), "Repository path not found: /tmp/missing");
        assert_eq!(err.kind(), ErrorKind::PathNotFound);
    }

    #[test]
    fn test_no_repositories_is_invalid_argument() {
        assert_eq!(LoomError::NoRepositories.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: LoomError = io_err.into();
        assert!(matches!(err, LoomError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: LoomError = json_err.into();
        assert!(matches!(err, LoomError::Json(_)));
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::NotAGitRepository).unwrap();
        assert_eq!(json, "\"not_a_git_repository\"");
    }
}
