//! End-to-end scenario 2 (spec.md §8): `complete_task` on a parent with a
//! not-yet-terminal child fails closed, mentions the child, and leaves the
//! parent's state and state history untouched. Completing the children
//! first lets the same call succeed.

use edison_core::core::value::Value;
use edison_core::core::{assets, path};
use edison_core::entity::{self, Task};
use edison_core::{session, workflow, EdisonError};
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
    assets::read_embedded_yaml("config/defaults.yaml").unwrap()
}

fn task_states(cfg: &Value) -> Vec<String> {
    cfg.get_path("task.states")
        .and_then(Value::as_map)
        .map(|m| m.keys().cloned().collect())
        .unwrap()
}

#[test]
fn parent_completion_blocks_until_every_child_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let cfg = cfg();
    fs::create_dir_all(path::management_root(dir.path())).unwrap();

    let repo = entity::task_repository(path::tasks_root(dir.path()), task_states(&cfg));
    let mut parent = Task::new("201-wave2-parent", "Parent", "todo");
    parent.child_ids = vec!["201.1-child-a".to_string(), "201.2-child-b".to_string()];
    repo.save(&mut parent, "seed", "system").unwrap();

    let mut child_a = Task::new("201.1-child-a", "Child A", "todo");
    repo.save(&mut child_a, "seed", "system").unwrap();
    let mut child_b = Task::new("201.2-child-b", "Child B", "todo");
    repo.save(&mut child_b, "seed", "system").unwrap();

    let sess = session::create_session(dir.path(), &cfg, "sess2", "master").unwrap();
    workflow::claim_task(dir.path(), &cfg, "201-wave2-parent", &sess.id).unwrap();
    workflow::claim_task(dir.path(), &cfg, "201.1-child-a", &sess.id).unwrap();
    workflow::claim_task(dir.path(), &cfg, "201.2-child-b", &sess.id).unwrap();

    let before = {
        let sess_repo = entity::task_repository(
            path::sessions_root(dir.path()).join(&sess.state).join(&sess.id).join("tasks"),
            task_states(&cfg),
        );
        sess_repo.get("201-wave2-parent").unwrap().unwrap()
    };

    let err = workflow::complete_task(dir.path(), &cfg, "201-wave2-parent", &sess.id).unwrap_err();
    match err {
        EdisonError::ConditionFailed { name, message } => {
            assert_eq!(name, "children-not-done");
            assert!(message.contains("Child task"));
        }
        other => panic!("expected ConditionFailed, got {other:?}"),
    }

    let sess_repo = entity::task_repository(
        path::sessions_root(dir.path()).join(&sess.state).join(&sess.id).join("tasks"),
        task_states(&cfg),
    );
    let after = sess_repo.get("201-wave2-parent").unwrap().unwrap();
    assert_eq!(after.state, before.state);
    assert_eq!(after.state_history.len(), before.state_history.len());

    workflow::complete_task(dir.path(), &cfg, "201.1-child-a", &sess.id).unwrap();
    // One child still wip -> the parent must still be blocked.
    let err = workflow::complete_task(dir.path(), &cfg, "201-wave2-parent", &sess.id).unwrap_err();
    assert!(matches!(err, EdisonError::ConditionFailed { ref name, .. } if name == "children-not-done"));

    workflow::complete_task(dir.path(), &cfg, "201.2-child-b", &sess.id).unwrap();

    let (parent, _) = workflow::complete_task(dir.path(), &cfg, "201-wave2-parent", &sess.id).unwrap();
    assert_eq!(parent.state, "done");
}
