//! Pure classification of a command string against a [`SecurityPolicy`].
//!
//! Nothing here spawns a process or touches the filesystem.

use super::policy::{DangerousPattern, SecurityPolicy, ShellMode};
use crate::error::{LoomError, Result};
use regex::Regex;
use std::path::{Component, Path};
use std::sync::LazyLock;

static REDIRECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(>>?|<)\s*(&?)([^\s;|&<>]*)").expect("redirect pattern is valid")
});

/// Check `command` against `policy`.
///
/// Returns `SecurityViolation` with a reason on the first rule broken.
pub fn validate(command: &str, policy: &SecurityPolicy) -> Result<()> {
    let base = leading_command(command)?;

    if policy.is_blocked(&base) {
        return Err(violation(format!("Command '{}' is not allowed", base)));
    }
    if policy.mode == ShellMode::Safe && !policy.allowed_commands.contains(&base) {
        return Err(violation(format!("Command '{}' not in allowed commands", base)));
    }

    for pattern in &policy.dangerous_patterns {
        if policy.mode == ShellMode::Permissive && !pattern.is_injection() {
            continue;
        }
        check_pattern(command, pattern, policy)?;
    }
    Ok(())
}

/// First shell word of `command`, reduced to its file name when it is a
/// path (`/usr/bin/git` -> `git`).
pub fn leading_command(command: &str) -> Result<String> {
    let words = shlex::split(command)
        .ok_or_else(|| violation("Invalid command syntax: unbalanced quotes".to_string()))?;
    let first = words
        .into_iter()
        .next()
        .ok_or_else(|| violation("Empty command".to_string()))?;
    let base = Path::new(&first)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or(first);
    Ok(base)
}

fn violation(reason: String) -> LoomError {
    LoomError::SecurityViolation(reason)
}

fn check_pattern(command: &str, pattern: &DangerousPattern, policy: &SecurityPolicy) -> Result<()> {
    match pattern {
        DangerousPattern::Literal(text) => {
            if command.contains(text.as_str()) {
                return Err(violation(format!("Command contains dangerous pattern: {:?}", text)));
            }
        }
        DangerousPattern::Word(word) => {
            let hit = command
                .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
                .any(|w| w == word);
            if hit {
                return Err(violation(format!("Command contains dangerous word: {}", word)));
            }
        }
        DangerousPattern::Background => {
            if has_background(command) {
                return Err(violation("Command contains background operator '&'".to_string()));
            }
        }
        DangerousPattern::Pipe => {
            for segment in pipe_segments(command).into_iter().skip(1) {
                let target = leading_command(segment)?;
                if policy.is_blocked(&target) || !policy.pipe_targets.contains(&target) {
                    return Err(violation(format!("Pipe into '{}' is not allowed", target)));
                }
            }
        }
        DangerousPattern::Redirect => {
            for caps in REDIRECT.captures_iter(command) {
                // `2>&1` style fd duplication
                if !caps[2].is_empty() {
                    continue;
                }
                let target = &caps[3];
                if !redirect_allowed(target, policy) {
                    return Err(violation(format!(
                        "Redirection '{}' to '{}' is outside allowed paths",
                        &caps[1], target
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Split on single `|`, leaving `||` alone.
fn pipe_segments(command: &str) -> Vec<&str> {
    let bytes = command.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'|' {
            continue;
        }
        let prev_pipe = i > 0 && bytes[i - 1] == b'|';
        let next_pipe = bytes.get(i + 1) == Some(&b'|');
        if !prev_pipe && !next_pipe {
            segments.push(&command[start..i]);
            start = i + 1;
        }
    }
    segments.push(&command[start..]);
    segments
}

/// True for an `&` that is not part of `&&` or an fd duplication such as
/// `2>&1` or `<&3`. `&>` counts: POSIX sh parses it as `&` then `>`.
fn has_background(command: &str) -> bool {
    let bytes = command.as_bytes();
    bytes.iter().enumerate().any(|(i, &b)| {
        if b != b'&' {
            return false;
        }
        let prev = i.checked_sub(1).map(|p| bytes[p]);
        let next = bytes.get(i + 1).copied();
        prev != Some(b'&') && next != Some(b'&') && !matches!(prev, Some(b'>') | Some(b'<'))
    })
}

fn redirect_allowed(target: &str, policy: &SecurityPolicy) -> bool {
    if target.is_empty() {
        return false;
    }
    if target == "/dev/null" {
        return true;
    }
    let path = Path::new(target);
    if path.components().any(|c| c == Component::ParentDir) {
        return false;
    }
    policy.redirect_paths.iter().any(|allowed| path.starts_with(allowed))
}
