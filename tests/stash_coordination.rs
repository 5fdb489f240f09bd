//! Coordinated stashes across repositories.

mod common;

use common::{git, workspace};
use loom::git::GitGateway;
use loom::pool::WorkerPool;
use loom::services::{ClearOutcome, StashCoordinator, StashOutcome, UnstashOutcome};
use std::sync::Arc;

fn coordinator() -> StashCoordinator {
    StashCoordinator::new(Arc::new(GitGateway::default())).with_pool(WorkerPool::new(4))
}

/// Integration test: stash dirty repos, skip clean ones, pop everything back
#[tokio::test]
async fn test_stash_and_pop_round_trip() {
    let (_temp, repos) = workspace(3);
    std::fs::write(repos[0].path.join("README.md"), "edited\n").unwrap();
    std::fs::write(repos[2].path.join("notes.txt"), "untracked\n").unwrap();
    let stash = coordinator();

    let saved = stash.stash_all(&repos, Some("before-upgrade")).await.unwrap();
    assert_eq!(saved.succeeded_count, 2);
    assert_eq!(saved.skipped_count, 1);
    assert!(matches!(saved.get("repo1"), Some(StashOutcome::Clean { .. })));
    match saved.get("repo0") {
        Some(StashOutcome::Stashed(record)) => assert_eq!(record.message, "loom-stash:before-upgrade"),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(git(&repos[0].path, &["status", "--porcelain"]), "");
    assert!(!repos[2].path.join("notes.txt").exists());

    let status = stash.stash_status(&repos).await.unwrap();
    let repo0 = status.get("repo0").unwrap().value().unwrap();
    assert!(!repo0.is_dirty);
    assert_eq!(repo0.loom_stashes, 1);

    let popped = stash.unstash_all(&repos, None).await.unwrap();
    assert_eq!(popped.succeeded_count, 2);
    assert!(matches!(popped.get("repo1"), Some(UnstashOutcome::NoStash { .. })));
    assert_eq!(std::fs::read_to_string(repos[0].path.join("README.md")).unwrap(), "edited\n");
    assert!(repos[2].path.join("notes.txt").exists());
}

/// Integration test: clear drops only coordinator stashes
#[tokio::test]
async fn test_clear_leaves_user_stashes() {
    let (_temp, repos) = workspace(2);
    let stash = coordinator();

    std::fs::write(repos[0].path.join("README.md"), "mine\n").unwrap();
    git(&repos[0].path, &["stash", "push", "-m", "my own stash"]);
    std::fs::write(repos[0].path.join("README.md"), "loom\n").unwrap();
    stash.stash_all(&repos, None).await.unwrap();

    let cleared = stash.clear_loom_stashes(&repos).await.unwrap();
    assert!(matches!(cleared.get("repo0"), Some(ClearOutcome::Cleared { dropped, .. }) if dropped.len() == 1));
    assert!(matches!(cleared.get("repo1"), Some(ClearOutcome::Nothing { .. })));

    let remaining = git(&repos[0].path, &["stash", "list"]);
    assert_eq!(remaining.lines().count(), 1);
    assert!(remaining.contains("my own stash"));
}
