//! End-to-end scenario 6 (spec.md §8): after `worktree-meta-init`, a
//! commit under an allowed shared-path prefix succeeds and leaves the
//! primary checkout's branch untouched; a missing message or a missing
//! meta worktree both fail closed.

use edison_core::core::value::Value;
use edison_core::session;
use edison_core::EdisonError;
use std::fs;
use std::path::Path;
use std::time::Duration;

fn init_repo(dir: &Path) {
    edison_core::core::git::run_git_ok(dir, &["init", "--quiet"], Duration::from_secs(5)).unwrap();
    edison_core::core::git::run_git_ok(dir, &["config", "user.email", "a@b.c"], Duration::from_secs(5)).unwrap();
    edison_core::core::git::run_git_ok(dir, &["config", "user.name", "test"], Duration::from_secs(5)).unwrap();
    fs::write(dir.join("README.md"), "hello").unwrap();
    edison_core::core::git::run_git_ok(dir, &["add", "."], Duration::from_secs(5)).unwrap();
    edison_core::core::git::run_git_ok(dir, &["commit", "-m", "init"], Duration::from_secs(5)).unwrap();
}

fn cfg() -> Value {
    edison_core::core::assets::read_embedded_yaml("config/defaults.yaml").unwrap()
}

#[test]
fn allowed_shared_path_commits_without_moving_the_primary_branch() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let cfg = cfg();

    session::worktree_meta_init(dir.path(), &cfg, "master").unwrap();

    let before = edison_core::core::git::run_git_ok(
        dir.path(),
        &["rev-parse", "--abbrev-ref", "HEAD"],
        Duration::from_secs(5),
    )
    .unwrap();

    let settings = session::MetaWorktreeSettings::from_config(dir.path(), &cfg);
    assert!(settings.shared_paths.iter().any(|p| p == ".project/sessions/"));
    fs::create_dir_all(settings.path.join(".project/sessions")).unwrap();
    fs::write(settings.path.join(".project/sessions/x.yaml"), "state: wip\n").unwrap();

    session::meta_commit(
        dir.path(),
        &cfg,
        "record session state",
        &[".project/sessions/x.yaml".to_string()],
    )
    .unwrap();

    let after = edison_core::core::git::run_git_ok(
        dir.path(),
        &["rev-parse", "--abbrev-ref", "HEAD"],
        Duration::from_secs(5),
    )
    .unwrap();
    assert_eq!(before, after, "meta-commit must never switch the primary checkout's branch");
}

#[test]
fn empty_message_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let cfg = cfg();
    session::worktree_meta_init(dir.path(), &cfg, "master").unwrap();

    let err = session::meta_commit(dir.path(), &cfg, "   ", &[]).unwrap_err();
    assert!(matches!(err, EdisonError::ProtectedPathViolation(_)));
}

#[test]
fn missing_meta_worktree_fails_with_an_actionable_message() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let cfg = cfg();

    let err = session::meta_commit(dir.path(), &cfg, "msg", &[]).unwrap_err();
    match err {
        EdisonError::ProtectedPathViolation(message) => {
            assert!(message.contains("worktree-meta-init"));
        }
        other => panic!("expected ProtectedPathViolation, got {other:?}"),
    }
}

#[test]
fn path_outside_shared_prefixes_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let cfg = cfg();
    session::worktree_meta_init(dir.path(), &cfg, "master").unwrap();

    let err = session::meta_commit(dir.path(), &cfg, "msg", &["outside/file.yaml".to_string()]).unwrap_err();
    assert!(matches!(err, EdisonError::ProtectedPathViolation(_)));
}
