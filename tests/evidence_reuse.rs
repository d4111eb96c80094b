//! End-to-end scenario 3 (spec.md §8): capturing evidence twice against an
//! unchanged working tree reuses the first snapshot — no new `round-N`
//! files are written and `presetEvidenceStatus` reports complete+passing.

use edison_core::core::atomic_io::LockParams;
use edison_core::core::value::Value;
use edison_core::core::{assets, config};
use edison_core::entity::Task;
use edison_core::{command_runner, evidence};
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

fn cfg_with_commands() -> Value {
    let mut cfg = assets::read_embedded_yaml("config/defaults.yaml").unwrap();
    cfg.set_path("validation.evidence.commands.test", Value::String("echo test-ok".into()));
    cfg.set_path("validation.evidence.commands.lint", Value::String("echo lint-ok".into()));
    cfg
}

/// Mirrors the `evidence capture` CLI path: check for a reusable snapshot
/// first, otherwise run every required command and write v1 evidence.
fn capture(root: &Path, cfg: &Value, task_id: &str, task: &Task, force: bool) -> (bool, u32) {
    let policy = edison_core::validation_policy::resolve_policy(cfg, Some("standard"), &[]).unwrap();
    let required = policy.preset.required_evidence.clone();

    let key = evidence::current_snapshot_key(root, Duration::from_secs(10));
    let snap_dir = evidence::snapshot_dir(root, task_id, &key);
    let status = evidence::snapshot_status(&snap_dir, &required);
    if status.complete_and_passing() && !force {
        return (true, evidence::current_round(root, task_id));
    }

    let round = evidence::current_round(root, task_id) + 1;
    let dir = evidence::round_dir(root, task_id, round);
    fs::create_dir_all(&dir).unwrap();

    let context = evidence::flatten_template_context(task);
    for logical_name in &required {
        let command_group = logical_name.clone();
        let template = config::section(cfg, "validation")
            .get_subsection("evidence")
            .get_subsection("commands")
            .get_path(&command_group)
            .and_then(Value::as_str)
            .unwrap_or("true")
            .to_string();
        let command = evidence::render_command_template(&template, &context);
        let result = command_runner::run_locked(
            &evidence::round_dir(root, task_id, round),
            &command_group,
            None,
            &command,
            root,
            Duration::from_secs(30),
            LockParams::default(),
        )
        .unwrap();
        assert_eq!(result.exit_code, 0);
        let ev = evidence::new_evidence(
            task_id,
            round,
            logical_name,
            &command,
            &root.display().to_string(),
            result.exit_code,
            result.started_at,
            result.output,
        );
        let file_name = evidence::evidence_file_name(cfg, logical_name);
        evidence::write_command_evidence(&dir, &file_name, &ev, None).unwrap();
    }

    // Copy the round's files into the snapshot cache for future reuse.
    fs::create_dir_all(&snap_dir).unwrap();
    for name in &required {
        fs::copy(dir.join(name), snap_dir.join(name)).unwrap();
    }

    (false, round)
}

#[test]
fn second_capture_on_unchanged_tree_reuses_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let cfg = cfg_with_commands();
    let task = Task::new("150-wave1-demo", "Demo", "wip");

    let (reused_first, round_first) = capture(dir.path(), &cfg, "150-wave1-demo", &task, false);
    assert!(!reused_first);
    assert_eq!(round_first, 1);
    let round_dir = evidence::round_dir(dir.path(), "150-wave1-demo", 1);
    assert!(round_dir.join("command-test.txt").is_file());
    assert!(round_dir.join("command-lint.txt").is_file());

    let files_before: Vec<_> = fs::read_dir(&round_dir).unwrap().collect();

    let (reused_second, round_second) = capture(dir.path(), &cfg, "150-wave1-demo", &task, false);
    assert!(reused_second, "second capture on an unchanged tree must report reusedSnapshot");
    assert_eq!(round_second, 1, "no new round-N directory is created on reuse");

    let files_after: Vec<_> = fs::read_dir(&round_dir).unwrap().collect();
    assert_eq!(files_before.len(), files_after.len());

    let policy = edison_core::validation_policy::resolve_policy(&cfg, Some("standard"), &[]).unwrap();
    let key = evidence::current_snapshot_key(dir.path(), Duration::from_secs(10));
    let snap_dir = evidence::snapshot_dir(dir.path(), "150-wave1-demo", &key);
    let status = evidence::snapshot_status(&snap_dir, &policy.preset.required_evidence);
    assert!(status.complete_and_passing());
}

#[test]
fn dirtying_the_tree_forces_a_fresh_round() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let cfg = cfg_with_commands();
    let task = Task::new("150-wave1-demo", "Demo", "wip");

    capture(dir.path(), &cfg, "150-wave1-demo", &task, false);
    fs::write(dir.path().join("README.md"), "changed").unwrap();

    let (reused, _) = capture(dir.path(), &cfg, "150-wave1-demo", &task, false);
    assert!(!reused, "a dirtied tree has a different fingerprint and must not reuse the prior snapshot");
}
