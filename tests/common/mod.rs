//! Shared helpers for integration tests: throwaway git repositories.

#![allow(dead_code)]

use loom::domain::Repository;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Run git synchronously in `repo`, returning trimmed stdout.
pub fn git(repo: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .env("LC_ALL", "C")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Create `<parent>/<name>` with one commit on `main`.
pub fn init_repo(parent: &Path, name: &str) -> PathBuf {
    let repo = parent.join(name);
    std::fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "-q"]);
    git(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(&repo, &["config", "user.email", "test@test.com"]);
    git(&repo, &["config", "user.name", "Test"]);
    git(&repo, &["config", "commit.gpgsign", "false"]);
    std::fs::write(repo.join("README.md"), "# Test\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-q", "-m", "Initial commit"]);
    repo
}

/// Commit `content` as `file` and return the new HEAD sha.
pub fn commit_file(repo: &Path, file: &str, content: &str, message: &str) -> String {
    std::fs::write(repo.join(file), content).unwrap();
    git(repo, &["add", file]);
    git(repo, &["commit", "-q", "-m", message]);
    git(repo, &["rev-parse", "HEAD"])
}

/// `count` repositories named `repo0..` under a fresh temp dir.
pub fn workspace(count: usize) -> (TempDir, Vec<Repository>) {
    let temp = TempDir::new().unwrap();
    let repos = (0..count)
        .map(|i| {
            let name = format!("repo{}", i);
            let path = init_repo(temp.path(), &name);
            Repository::new(name, path)
        })
        .collect();
    (temp, repos)
}
