//! Classification of git failures by their stderr.
//!
//! Git reports lock contention only in English prose, so every invocation
//! runs with `LC_ALL=C` and matching happens against the table below.

/// Whether a failed git invocation is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Another process held a repository lock; retrying should succeed
    TransientLockContention,
    /// Anything else
    Permanent,
}

impl FailureClass {
    pub fn is_transient(self) -> bool {
        self == Self::TransientLockContention
    }
}

/// Lowercased stderr fragments that indicate a held lock.
///
/// `unable to create` only counts together with `.lock`, otherwise it also
/// matches permission errors on ordinary files.
const LOCK_SIGNATURES: &[&[&str]] = &[
    &["index.lock"],
    &["unable to create", ".lock"],
    &["cannot lock ref"],
    &["unable to lock"],
    &["resource temporarily unavailable"],
    &["another git process"],
];

/// Classify a failed invocation from its stderr.
pub fn classify(stderr: &str) -> FailureClass {
    let lowered = stderr.to_lowercase();
    let hit = LOCK_SIGNATURES
        .iter()
        .any(|parts| parts.iter().all(|p| lowered.contains(p)));
    if hit {
        FailureClass::TransientLockContention
    } else {
        FailureClass::Permanent
    }
}
