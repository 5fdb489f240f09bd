//! Stash records and parsing of `git stash list` output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default message prefix marking stashes owned by the coordinator.
pub const DEFAULT_STASH_PREFIX: &str = "loom-stash:";

/// Field separator used in the `git stash list` format string.
pub const STASH_FIELD_SEP: char = '\u{1f}';

/// `--format` argument matching [`parse_stash_list`].
pub const STASH_LIST_FORMAT: &str = "--format=%gd%x1f%gs%x1f%ct";

/// A stash created or consumed by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashRecord {
    pub repo_name: String,
    pub stash_ref: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// One line of a repository's stash list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashEntry {
    /// `stash@{N}`
    pub reference: String,
    pub index: usize,
    pub branch: String,
    pub message: String,
    pub created_at: Option<DateTime<Utc>>,
    pub is_loom: bool,
}

impl StashEntry {
    pub fn into_record(self, repo_name: impl Into<String>) -> StashRecord {
        StashRecord {
            repo_name: repo_name.into(),
            stash_ref: self.reference,
            message: self.message,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Parse output of `git stash list` run with [`STASH_LIST_FORMAT`].
///
/// Entries are returned newest first, as git lists them. Lines that do not
/// have the expected shape are ignored.
pub fn parse_stash_list(output: &str, prefix: &str) -> Vec<StashEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(STASH_FIELD_SEP);
            let reference = fields.next()?.trim().to_string();
            let subject = fields.next()?;
            let created_at = fields
                .next()
                .and_then(|ts| ts.trim().parse::<i64>().ok())
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));
            let index = parse_stash_index(&reference)?;
            let (branch, message) = split_subject(subject);
            Some(StashEntry {
                is_loom: message.starts_with(prefix),
                reference,
                index,
                branch,
                message,
                created_at,
            })
        })
        .collect()
}

/// `stash@{3}` -> 3
fn parse_stash_index(reference: &str) -> Option<usize> {
    reference.strip_prefix("stash@{")?.strip_suffix('}')?.parse().ok()
}

/// Split a stash reflog subject into branch and message.
///
/// git writes `On <branch>: <message>` for `stash push -m` and
/// `WIP on <branch>: <sha> <subject>` without a message.
fn split_subject(subject: &str) -> (String, String) {
    let rest = subject
        .strip_prefix("WIP on ")
        .or_else(|| subject.strip_prefix("On "))
        .unwrap_or(subject);
    match rest.split_once(": ") {
        Some((branch, message)) => (branch.to_string(), message.to_string()),
        None => (String::new(), rest.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(reference: &str, subject: &str, ts: &str) -> String {
        format!("{reference}{STASH_FIELD_SEP}{subject}{STASH_FIELD_SEP}{ts}")
    }

    #[test]
    fn test_parse_loom_and_user_stashes() {
        let output = [
            line("stash@{0}", "On main: loom-stash:before-upgrade", "1760000000"),
            line("stash@{1}", "WIP on feature/x: 1a2b3c4 wip commit", "1750000000"),
            line("stash@{2}", "On main: my own stash", "1740000000"),
        ]
        .join("\n");

        let entries = parse_stash_list(&output, DEFAULT_STASH_PREFIX);
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].index, 0);
        assert_eq!(entries[0].branch, "main");
        assert_eq!(entries[0].message, "loom-stash:before-upgrade");
        assert!(entries[0].is_loom);
        assert_eq!(entries[0].created_at.unwrap().timestamp(), 1760000000);

        assert_eq!(entries[1].branch, "feature/x");
        assert_eq!(entries[1].message, "1a2b3c4 wip commit");
        assert!(!entries[1].is_loom);

        assert_eq!(entries[2].index, 2);
        assert!(!entries[2].is_loom);
    }

    #[test]
    fn test_prefix_must_lead_message() {
        let output = line("stash@{0}", "On main: note about loom-stash:foo", "1");
        let entries = parse_stash_list(&output, DEFAULT_STASH_PREFIX);
        assert!(!entries[0].is_loom);
    }

    #[test]
    fn test_message_containing_separator() {
        let output = line("stash@{0}", "On main: loom-stash:fix: retry logic", "1");
        let entries = parse_stash_list(&output, DEFAULT_STASH_PREFIX);
        assert_eq!(entries[0].message, "loom-stash:fix: retry logic");
    }

    #[test]
    fn test_empty_and_malformed_lines() {
        assert!(parse_stash_list("", DEFAULT_STASH_PREFIX).is_empty());
        assert!(parse_stash_list("garbage line\n", DEFAULT_STASH_PREFIX).is_empty());
        let bad_ref = line("stash@{x}", "On main: m", "1");
        assert!(parse_stash_list(&bad_ref, DEFAULT_STASH_PREFIX).is_empty());
    }

    #[test]
    fn test_into_record() {
        let output = line("stash@{0}", "On main: loom-stash:m", "1760000000");
        let entry = parse_stash_list(&output, DEFAULT_STASH_PREFIX).remove(0);
        let record = entry.into_record("api");
        assert_eq!(record.repo_name, "api");
        assert_eq!(record.stash_ref, "stash@{0}");
        assert_eq!(record.message, "loom-stash:m");
    }
}
