//! Per-repository results and the generic bulk report that aggregates them.

use crate::error::{ErrorKind, LoomError, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// How a single item of a bulk operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Succeeded,
    Skipped,
    Failed,
}

/// Anything that can be aggregated into a [`BulkResult`].
pub trait Outcome {
    /// Name of the repository this outcome belongs to.
    fn repo(&self) -> &str;

    fn status(&self) -> OutcomeStatus;
}

/// A per-repository failure, as carried in reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoFailure {
    pub repo: String,
    pub kind: ErrorKind,
    pub error: String,
}

impl RepoFailure {
    pub fn new(repo: impl Into<String>, err: &LoomError) -> Self {
        Self {
            repo: repo.into(),
            kind: err.kind(),
            error: err.to_string(),
        }
    }
}

/// Result of running one command or operation against one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub repository_id: String,
    pub path: String,
    pub command: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ExecutionResult {
    /// Result for a process that ran to completion.
    pub fn completed(
        repository_id: impl Into<String>,
        path: impl Into<String>,
        command: impl Into<String>,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        duration: Duration,
    ) -> Self {
        let success = exit_code == Some(0);
        Self {
            repository_id: repository_id.into(),
            path: path.into(),
            command: command.into(),
            success,
            stdout,
            stderr,
            exit_code,
            duration_ms: duration.as_millis() as u64,
            error_kind: None,
        }
    }

    /// Result for an operation that never produced a process result.
    pub fn failure(
        repository_id: impl Into<String>,
        path: impl Into<String>,
        command: impl Into<String>,
        err: &LoomError,
        duration: Duration,
    ) -> Self {
        Self {
            repository_id: repository_id.into(),
            path: path.into(),
            command: command.into(),
            success: false,
            stdout: String::new(),
            stderr: err.to_string(),
            exit_code: None,
            duration_ms: duration.as_millis() as u64,
            error_kind: Some(err.kind()),
        }
    }
}

impl Outcome for ExecutionResult {
    fn repo(&self) -> &str {
        &self.repository_id
    }

    fn status(&self) -> OutcomeStatus {
        if self.success {
            OutcomeStatus::Succeeded
        } else {
            OutcomeStatus::Failed
        }
    }
}

/// Aggregate report of a fan-out over repositories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkResult<T> {
    pub results: Vec<T>,
    pub succeeded_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    pub total_duration_ms: u64,
}

impl<T: Outcome> BulkResult<T> {
    pub fn new(results: Vec<T>, total_duration: Duration) -> Self {
        let mut succeeded_count = 0;
        let mut skipped_count = 0;
        let mut failed_count = 0;
        for result in &results {
            match result.status() {
                OutcomeStatus::Succeeded => succeeded_count += 1,
                OutcomeStatus::Skipped => skipped_count += 1,
                OutcomeStatus::Failed => failed_count += 1,
            }
        }
        Self {
            results,
            succeeded_count,
            skipped_count,
            failed_count,
            total_duration_ms: total_duration.as_millis() as u64,
        }
    }

    /// Build a report timed from `started`.
    pub fn since(results: Vec<T>, started: Instant) -> Self {
        Self::new(results, started.elapsed())
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Fraction of non-skipped items that succeeded.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.succeeded_count + self.failed_count;
        if attempted == 0 {
            return 0.0;
        }
        self.succeeded_count as f64 / attempted as f64
    }

    pub fn is_partial_failure(&self) -> bool {
        self.failed_count > 0 && self.succeeded_count > 0
    }

    /// Find the outcome for a repository by name.
    pub fn get(&self, repo: &str) -> Option<&T> {
        self.results.iter().find(|r| r.repo() == repo)
    }

    pub fn with_status(&self, status: OutcomeStatus) -> impl Iterator<Item = &T> {
        self.results.iter().filter(move |r| r.status() == status)
    }

    /// Treat any per-repository failure as an overall failure.
    pub fn ensure_success(self) -> Result<Self> {
        if self.failed_count > 0 {
            return Err(LoomError::PartialFailure {
                succeeded: self.succeeded_count,
                failed: self.failed_count,
            });
        }
        Ok(self)
    }
}

/// A read-only observation of one repository, or why it could not be made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RepoReading<T> {
    Read { repo: String, value: T },
    Failed(RepoFailure),
}

impl<T> RepoReading<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Read { value, .. } => Some(value),
            Self::Failed(_) => None,
        }
    }
}

impl<T> Outcome for RepoReading<T> {
    fn repo(&self) -> &str {
        match self {
            Self::Read { repo, .. } => repo,
            Self::Failed(f) => &f.repo,
        }
    }

    fn status(&self) -> OutcomeStatus {
        match self {
            Self::Read { .. } => OutcomeStatus::Succeeded,
            Self::Failed(_) => OutcomeStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(name: &str) -> ExecutionResult {
        ExecutionResult::completed(
            name,
            format!("/src/{name}"),
            "true",
            Some(0),
            String::new(),
            String::new(),
            Duration::from_millis(5),
        )
    }

    fn failed(name: &str) -> ExecutionResult {
        let err = LoomError::PathNotFound(format!("/src/{name}").into());
        ExecutionResult::failure(name, format!("/src/{name}"), "true", &err, Duration::ZERO)
    }

    #[test]
    fn test_completed_success_depends_on_exit_code() {
        assert!(ok("a").success);
        let r = ExecutionResult::completed("a", "/a", "false", Some(1), String::new(), String::new(), Duration::ZERO);
        assert!(!r.success);
        let killed = ExecutionResult::completed("a", "/a", "sleep", None, String::new(), String::new(), Duration::ZERO);
        assert!(!killed.success);
    }

    #[test]
    fn test_failure_carries_kind() {
        let r = failed("c");
        assert!(!r.success);
        assert_eq!(r.error_kind, Some(ErrorKind::PathNotFound));
        assert!(r.stderr.contains("/src/c"));
    }

    #[test]
    fn test_bulk_counts() {
        let bulk = BulkResult::new(vec![ok("a"), ok("b"), failed("c")], Duration::from_millis(20));
        assert_eq!(bulk.total(), 3);
        assert_eq!(bulk.succeeded_count, 2);
        assert_eq!(bulk.failed_count, 1);
        assert_eq!(bulk.skipped_count, 0);
        assert_eq!(bulk.total_duration_ms, 20);
        assert!(bulk.is_partial_failure());
        assert!((bulk.success_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bulk_get_and_filter() {
        let bulk = BulkResult::new(vec![ok("a"), failed("c")], Duration::ZERO);
        assert!(bulk.get("a").unwrap().success);
        assert!(bulk.get("zzz").is_none());
        let failed: Vec<_> = bulk.with_status(OutcomeStatus::Failed).map(|r| r.repo()).collect();
        assert_eq!(failed, vec!["c"]);
    }

    #[test]
    fn test_ensure_success() {
        let all_ok = BulkResult::new(vec![ok("a")], Duration::ZERO);
        assert!(all_ok.ensure_success().is_ok());

        let mixed = BulkResult::new(vec![ok("a"), failed("b")], Duration::ZERO);
        let err = mixed.ensure_success().unwrap_err();
        assert!(matches!(err, LoomError::PartialFailure { succeeded: 1, failed: 1 }));
    }

    #[test]
    fn test_empty_bulk() {
        let bulk: BulkResult<ExecutionResult> = BulkResult::new(Vec::new(), Duration::ZERO);
        assert_eq!(bulk.total(), 0);
        assert_eq!(bulk.success_rate(), 0.0);
        assert!(!bulk.is_partial_failure());
    }

    #[test]
    fn test_serializes_to_plain_json() {
        let bulk = BulkResult::new(vec![ok("a"), failed("c")], Duration::ZERO);
        let json = serde_json::to_value(&bulk).unwrap();
        assert_eq!(json["succeeded_count"], 1);
        assert_eq!(json["results"][1]["error_kind"], "path_not_found");
        assert!(json["results"][0].get("error_kind").is_none());
    }

    #[test]
    fn test_repo_reading() {
        let read = RepoReading::Read {
            repo: "a".to_string(),
            value: 3,
        };
        let failed: RepoReading<i32> =
            RepoReading::Failed(RepoFailure::new("b", &LoomError::PathNotFound("/x".into())));
        assert_eq!(read.value(), Some(&3));
        assert_eq!(failed.repo(), "b");

        let bulk = BulkResult::new(vec![read, failed], Duration::ZERO);
        assert_eq!(bulk.succeeded_count, 1);
        assert_eq!(bulk.failed_count, 1);
        let json = serde_json::to_value(&bulk.results[1]).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "path_not_found");
    }
}
