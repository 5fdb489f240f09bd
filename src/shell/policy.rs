//! Security policy applied to shell commands before they are spawned.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// How strictly commands are screened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellMode {
    /// Only allow-listed commands, no pipes/redirects outside policy
    #[default]
    Safe,
    /// Anything not blocked, every dangerous pattern checked
    Restricted,
    /// Anything not blocked, only injection patterns checked
    Permissive,
}

/// A shape of command text treated as dangerous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DangerousPattern {
    /// Substring anywhere in the command, e.g. `$(` or `&&`
    Literal(String),
    /// Standalone word, e.g. `eval`
    Word(String),
    /// `|` into a command outside the policy's pipe targets
    Pipe,
    /// `>`, `>>` or `<` on a path outside the policy's redirect paths
    Redirect,
    /// A lone `&` that backgrounds one command and starts the next
    Background,
}

impl DangerousPattern {
    /// Patterns that enable command injection. These are checked in every
    /// mode; pipes and redirects are relaxed in permissive mode.
    pub fn is_injection(&self) -> bool {
        matches!(self, Self::Literal(_) | Self::Word(_) | Self::Background)
    }
}

const DEFAULT_ALLOWED: &[&str] = &[
    "ls", "cat", "echo", "pwd", "whoami", "date", "which", "head", "tail", "grep", "find", "sort",
    "uniq", "wc", "cut", "awk", "sed", "tr", "git", "python", "python3", "node", "npm", "yarn",
    "pip", "pip3", "just", "make", "cmake", "cargo", "go", "java", "javac", "mvn", "docker",
    "kubectl", "helm", "terraform", "ansible", "sleep", "true", "false",
];

const DEFAULT_BLOCKED: &[&str] = &[
    "rm", "rmdir", "mv", "cp", "dd", "shred", "kill", "killall", "shutdown", "reboot", "halt",
    "poweroff", "su", "sudo", "passwd", "chown", "chmod", "chgrp", "mount", "umount", "fdisk",
    "mkfs", "format", "del", "deltree", "rd", "erase",
];

const DEFAULT_PIPE_TARGETS: &[&str] = &["grep", "head", "tail", "wc", "sort", "uniq", "cut", "tr"];

fn to_set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_patterns() -> Vec<DangerousPattern> {
    let mut patterns: Vec<DangerousPattern> = ["$(", "`", "&&", "||", ";", "\n", "\r", "<(", ">("]
        .into_iter()
        .map(|p| DangerousPattern::Literal(p.to_string()))
        .collect();
    patterns.extend(
        ["eval", "exec", "system"]
            .into_iter()
            .map(|w| DangerousPattern::Word(w.to_string())),
    );
    patterns.push(DangerousPattern::Background);
    patterns.push(DangerousPattern::Pipe);
    patterns.push(DangerousPattern::Redirect);
    patterns
}

/// Immutable screening rules for a shell gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub mode: ShellMode,
    pub allowed_commands: BTreeSet<String>,
    pub blocked_commands: BTreeSet<String>,
    pub dangerous_patterns: Vec<DangerousPattern>,
    /// Commands that may receive piped input
    pub pipe_targets: BTreeSet<String>,
    /// Directories redirections may read from or write into
    pub redirect_paths: Vec<PathBuf>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::new(ShellMode::default())
    }
}

impl SecurityPolicy {
    /// Built-in lists for the given mode.
    pub fn new(mode: ShellMode) -> Self {
        Self {
            mode,
            allowed_commands: to_set(DEFAULT_ALLOWED),
            blocked_commands: to_set(DEFAULT_BLOCKED),
            dangerous_patterns: default_patterns(),
            pipe_targets: to_set(DEFAULT_PIPE_TARGETS),
            redirect_paths: Vec::new(),
        }
    }

    /// Add commands to the allow list.
    pub fn allow<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_commands.extend(commands.into_iter().map(Into::into));
        self
    }

    /// Add commands to the block list. Blocking wins over allowing.
    pub fn block<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_commands.extend(commands.into_iter().map(Into::into));
        self
    }

    pub fn with_pipe_targets<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pipe_targets.extend(commands.into_iter().map(Into::into));
        self
    }

    pub fn with_redirect_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.redirect_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn with_patterns(mut self, patterns: Vec<DangerousPattern>) -> Self {
        self.dangerous_patterns = patterns;
        self
    }

    pub fn is_blocked(&self, command: &str) -> bool {
        self.blocked_commands.contains(command)
    }

    pub fn is_allowed(&self, command: &str) -> bool {
        self.allowed_commands.contains(command) && !self.is_blocked(command)
    }
}
