//! Task-QA Workflow: the cross-entity operations that drive claim,
//! completion, abort, and validation, plus session completion which
//! moves session-scoped records back into the global tree.

use crate::core::config;
use crate::core::error::{EdisonError, Result};
use crate::core::path;
use crate::core::value::Value;
use crate::entity::{self, FrontmatterEntity, MarkdownRepository, Qa, StateTransition, Task};
use crate::session::{self, Session};
use std::fs;
use std::path::{Path, PathBuf};

fn task_states(cfg: &Value) -> Vec<String> {
    config::section(cfg, "task")
        .get_subsection("states")
        .as_map()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default()
}

fn qa_states(cfg: &Value) -> Vec<String> {
    config::section(cfg, "qa")
        .get_subsection("states")
        .as_map()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default()
}

fn global_task_repo(root: &Path, cfg: &Value) -> MarkdownRepository<Task> {
    entity::task_repository(path::tasks_root(root), task_states(cfg))
}

fn global_qa_repo(root: &Path, cfg: &Value) -> MarkdownRepository<Qa> {
    entity::qa_repository(path::qa_root(root), qa_states(cfg))
}

fn session_tasks_base(root: &Path, session: &Session) -> PathBuf {
    path::sessions_root(root)
        .join(&session.state)
        .join(&session.id)
        .join("tasks")
}

fn session_qa_base(root: &Path, session: &Session) -> PathBuf {
    path::sessions_root(root)
        .join(&session.state)
        .join(&session.id)
        .join("qa")
}

fn session_task_repo(root: &Path, cfg: &Value, session: &Session) -> MarkdownRepository<Task> {
    entity::task_repository(session_tasks_base(root, session), task_states(cfg))
}

fn session_qa_repo(root: &Path, cfg: &Value, session: &Session) -> MarkdownRepository<Qa> {
    entity::qa_repository(session_qa_base(root, session), qa_states(cfg))
}

fn repo_for_task(root: &Path, cfg: &Value, task: &Task) -> Result<MarkdownRepository<Task>> {
    match &task.session_id {
        Some(sid) => {
            let session = session::load_session(root, sid)?;
            Ok(session_task_repo(root, cfg, &session))
        }
        None => Ok(global_task_repo(root, cfg)),
    }
}

fn repo_for_qa(root: &Path, cfg: &Value, qa: &Qa) -> Result<MarkdownRepository<Qa>> {
    match &qa.session_id {
        Some(sid) => {
            let session = session::load_session(root, sid)?;
            Ok(session_qa_repo(root, cfg, &session))
        }
        None => Ok(global_qa_repo(root, cfg)),
    }
}

fn find_task(root: &Path, cfg: &Value, id: &str) -> Result<Option<Task>> {
    if let Some(t) = global_task_repo(root, cfg).get(id)? {
        return Ok(Some(t));
    }
    let sessions_dir = path::sessions_root(root);
    let Ok(state_entries) = fs::read_dir(&sessions_dir) else {
        return Ok(None);
    };
    for state_entry in state_entries.flatten() {
        if !state_entry.path().is_dir() {
            continue;
        }
        let Ok(sess_entries) = fs::read_dir(state_entry.path()) else {
            continue;
        };
        for sess_entry in sess_entries.flatten() {
            let repo = entity::task_repository(sess_entry.path().join("tasks"), task_states(cfg));
            if let Some(t) = repo.get(id)? {
                return Ok(Some(t));
            }
        }
    }
    Ok(None)
}

fn relocate_cross_tree<E: FrontmatterEntity>(
    from: &MarkdownRepository<E>,
    to: &MarkdownRepository<E>,
    entity_value: &mut E,
    from_state: &str,
    reason: &str,
    actor: &str,
) -> Result<()> {
    let new_state = entity_value.state().to_string();
    if from_state != new_state {
        entity_value.push_state_history(StateTransition {
            from: from_state.to_string(),
            to: new_state,
            at: crate::core::time::now_rfc3339(),
            reason: reason.to_string(),
            actor: actor.to_string(),
        });
    }
    entity_value.touch_updated_at();
    to.save(entity_value, reason, actor)?;
    from.delete(entity_value.id())?;
    Ok(())
}

/// `claim_task`: move Task (+ QA, if present) from the global tree into
/// the session's tree, transitioning Task to `wip`.
pub fn claim_task(root: &Path, cfg: &Value, task_id: &str, session_id: &str) -> Result<(Task, Option<Qa>)> {
    let session = session::load_session(root, session_id)?;
    let global_tasks = global_task_repo(root, cfg);
    let mut task = global_tasks
        .get(task_id)?
        .ok_or_else(|| EdisonError::NotFound(format!("task '{task_id}' not found")))?;

    if task.state == "done" || task.state == "validated" {
        return Err(EdisonError::GuardDenied(format!(
            "task '{task_id}' is already {}",
            task.state
        )));
    }
    if task.state != "todo" && task.state != "wip" {
        return Err(EdisonError::InvalidTransition {
            from: task.state.clone(),
            to: "wip".to_string(),
        });
    }

    let from_state = task.state.clone();
    task.set_session_id(Some(session_id.to_string()));
    task.set_state("wip");
    let sess_repo = session_task_repo(root, cfg, &session);
    relocate_cross_tree(&global_tasks, &sess_repo, &mut task, &from_state, "claimed", "system")?;

    let qa_id = path::qa_id_for(task_id);
    let global_qa = global_qa_repo(root, cfg);
    let qa = if let Some(mut qa) = global_qa.get(&qa_id)? {
        let qa_from_state = qa.state.clone();
        qa.set_session_id(Some(session_id.to_string()));
        let sess_qa_repo = session_qa_repo(root, cfg, &session);
        relocate_cross_tree(&global_qa, &sess_qa_repo, &mut qa, &qa_from_state, "claimed", "system")?;
        Some(qa)
    } else {
        None
    };

    Ok((task, qa))
}

/// Check that every child of `task` is in a terminal state
/// (`done`/`validated`), scanning both the global tree and the owning
/// session's tree.
fn children_terminal(root: &Path, cfg: &Value, task: &Task) -> Result<(bool, String)> {
    for child_id in &task.child_ids {
        let child = find_task(root, cfg, child_id)?;
        match child {
            Some(c) if c.state == "done" || c.state == "validated" => continue,
            Some(c) => {
                return Ok((
                    false,
                    format!("Child task '{child_id}' is not terminal (state: {})", c.state),
                ));
            }
            None => {
                return Ok((false, format!("Child task '{child_id}' not found")));
            }
        }
    }
    Ok((true, String::new()))
}

/// `complete_task`: require `wip` owned by `session_id`; enforce the
/// children-terminal precondition; advance a `waiting` QA to `todo`.
pub fn complete_task(root: &Path, cfg: &Value, task_id: &str, session_id: &str) -> Result<(Task, Option<Qa>)> {
    let session = session::load_session(root, session_id)?;
    let repo = session_task_repo(root, cfg, &session);
    let mut task = repo
        .get(task_id)?
        .ok_or_else(|| EdisonError::NotFound(format!("task '{task_id}' not found in session")))?;

    if task.state != "wip" || task.session_id.as_deref() != Some(session_id) {
        return Err(EdisonError::GuardDenied(format!(
            "task '{task_id}' is not wip-owned by session '{session_id}'"
        )));
    }

    let (ok, message) = children_terminal(root, cfg, &task)?;
    if !ok {
        return Err(EdisonError::ConditionFailed {
            name: "children-not-done".to_string(),
            message,
        });
    }

    task.set_state("done");
    repo.save(&mut task, "completed", "system")?;

    let qa_id = path::qa_id_for(task_id);
    let qa_repo = session_qa_repo(root, cfg, &session);
    let qa = if let Some(mut qa) = qa_repo.get(&qa_id)? {
        if qa.state == "waiting" {
            qa.set_state("todo");
            qa_repo.save(&mut qa, "task-completed", "system")?;
        }
        Some(qa)
    } else {
        None
    };

    Ok((task, qa))
}

/// `abort_task`: reverse of claim — move Task (+ QA) back to the global
/// tree, reverting to the state recorded before the claim.
pub fn abort_task(root: &Path, cfg: &Value, task_id: &str, session_id: &str) -> Result<(Task, Option<Qa>)> {
    let session = session::load_session(root, session_id)?;
    let repo = session_task_repo(root, cfg, &session);
    let mut task = repo
        .get(task_id)?
        .ok_or_else(|| EdisonError::NotFound(format!("task '{task_id}' not found in session")))?;

    if task.session_id.as_deref() != Some(session_id) {
        return Err(EdisonError::GuardDenied(format!(
            "task '{task_id}' is not owned by session '{session_id}'"
        )));
    }

    let prior_state = task
        .state_history
        .last()
        .filter(|t| t.to == task.state)
        .map(|t| t.from.clone())
        .unwrap_or_else(|| "todo".to_string());

    let from_state = task.state.clone();
    task.set_session_id(None);
    task.set_state(&prior_state);
    let global_tasks = global_task_repo(root, cfg);
    relocate_cross_tree(&repo, &global_tasks, &mut task, &from_state, "aborted", "system")?;

    let qa_id = path::qa_id_for(task_id);
    let qa_repo = session_qa_repo(root, cfg, &session);
    let qa = if let Some(mut qa) = qa_repo.get(&qa_id)? {
        let qa_from_state = qa.state.clone();
        qa.set_session_id(None);
        let global_qa = global_qa_repo(root, cfg);
        relocate_cross_tree(&qa_repo, &global_qa, &mut qa, &qa_from_state, "aborted", "system")?;
        Some(qa)
    } else {
        None
    };

    Ok((task, qa))
}

/// `validate_task`: Task transitions `done -> validated`, wherever it
/// currently lives (session tree or, post session-completion, global).
pub fn validate_task(root: &Path, cfg: &Value, task_id: &str) -> Result<Task> {
    let mut task = find_task(root, cfg, task_id)?
        .ok_or_else(|| EdisonError::NotFound(format!("task '{task_id}' not found")))?;
    if task.state != "done" {
        return Err(EdisonError::InvalidTransition {
            from: task.state.clone(),
            to: "validated".to_string(),
        });
    }
    let repo = repo_for_task(root, cfg, &task)?;
    task.set_state("validated");
    repo.save(&mut task, "validated", "system")?;
    Ok(task)
}

/// `complete_session`: move every task/QA file under the session tree
/// back to the global tree preserving states, then transition the
/// session to its terminal state.
pub fn complete_session(root: &Path, cfg: &Value, session_id: &str) -> Result<Session> {
    let session = session::load_session(root, session_id)?;

    let session_tasks = session_tasks_base(root, &session);
    let global_tasks_root = path::tasks_root(root);
    relocate_all_files(&session_tasks, &global_tasks_root, "session_id")?;

    let session_qa = session_qa_base(root, &session);
    let global_qa_root = path::qa_root(root);
    relocate_all_files(&session_qa, &global_qa_root, "session_id")?;

    let session_machine = crate::state_machine::MachineSpec::from_value(
        &config::section(cfg, "session").get_subsection("states"),
    );
    let terminal = session_machine
        .states
        .iter()
        .find(|(_, s)| s.is_final)
        .map(|(name, _)| name.clone())
        .unwrap_or_else(|| "done".to_string());

    session::transition_session(root, session_id, &terminal)
}

/// Move every `<id>.md` under `<session_base>/<state>/` to
/// `<global_base>/<state>/`, clearing `session_id` in the frontmatter.
fn relocate_all_files(session_base: &Path, global_base: &Path, session_id_key: &str) -> Result<()> {
    let Ok(state_dirs) = fs::read_dir(session_base) else {
        return Ok(());
    };
    for state_dir in state_dirs.flatten() {
        if !state_dir.path().is_dir() {
            continue;
        }
        let state = state_dir.file_name().to_string_lossy().to_string();
        let Ok(files) = fs::read_dir(state_dir.path()) else {
            continue;
        };
        let target_dir = global_base.join(&state);
        fs::create_dir_all(&target_dir)?;
        for file in files.flatten() {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let text = fs::read_to_string(&path)?;
            let (mut frontmatter, body) = entity::parse_frontmatter_document(&text)?;
            frontmatter.set_path(session_id_key, Value::Null);
            let doc = entity::render_frontmatter_document(&frontmatter, &body)?;
            let target_path = target_dir.join(path.file_name().unwrap());
            crate::core::atomic_io::atomic_write(
                &target_path,
                doc.as_bytes(),
                crate::core::atomic_io::LockParams::default(),
            )?;
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use std::time::Duration;
    use tempfile::tempdir;

    fn init_repo(dir: &Path) {
        crate::core::git::run_git_ok(dir, &["init", "--quiet"], Duration::from_secs(5)).unwrap();
        crate::core::git::run_git_ok(dir, &["config", "user.email", "a@b.c"], Duration::from_secs(5)).unwrap();
        crate::core::git::run_git_ok(dir, &["config", "user.name", "t"], Duration::from_secs(5)).unwrap();
        fs::write(dir.join("README.md"), "x").unwrap();
        crate::core::git::run_git_ok(dir, &["add", "."], Duration::from_secs(5)).unwrap();
        crate::core::git::run_git_ok(dir, &["commit", "-m", "init"], Duration::from_secs(5)).unwrap();
    }

    fn cfg() -> Value {
        crate::core::assets::read_embedded_yaml("config/defaults.yaml").unwrap()
    }

    fn seed_task(root: &Path, cfg: &Value, id: &str, state: &str) {
        let repo = global_task_repo(root, cfg);
        let mut t = Task::new(id, "demo task", state);
        repo.save(&mut t, "seed", "system").unwrap();
    }

    #[test]
    fn claim_moves_task_into_session_wip() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let cfg = cfg();
        std::fs::create_dir_all(path::management_root(dir.path())).unwrap();
        seed_task(dir.path(), &cfg, "150-wave1-demo", "todo");

        let session = session::create_session(dir.path(), &cfg, "sess1", "master").unwrap();
        let (task, _qa) = claim_task(dir.path(), &cfg, "150-wave1-demo", &session.id).unwrap();

        assert_eq!(task.state, "wip");
        assert_eq!(task.session_id.as_deref(), Some("sess1"));
        assert!(!path::tasks_root(dir.path()).join("todo/150-wave1-demo.md").exists());
        let expected = session_tasks_base(dir.path(), &session).join("wip/150-wave1-demo.md");
        assert!(expected.is_file());
    }

    #[test]
    fn complete_fails_when_child_not_done() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let cfg = cfg();
        std::fs::create_dir_all(path::management_root(dir.path())).unwrap();

        let repo = global_task_repo(dir.path(), &cfg);
        let mut parent = Task::new("201-wave2-parent", "parent", "todo");
        parent.child_ids = vec!["201.1-child".to_string()];
        repo.save(&mut parent, "seed", "system").unwrap();
        let mut child = Task::new("201.1-child", "child", "todo");
        repo.save(&mut child, "seed", "system").unwrap();

        let session = session::create_session(dir.path(), &cfg, "sess2", "master").unwrap();
        claim_task(dir.path(), &cfg, "201-wave2-parent", &session.id).unwrap();
        claim_task(dir.path(), &cfg, "201.1-child", &session.id).unwrap();

        let err = complete_task(dir.path(), &cfg, "201-wave2-parent", &session.id).unwrap_err();
        assert!(matches!(err, EdisonError::ConditionFailed { ref name, .. } if name == "children-not-done"));
    }

    #[test]
    fn abort_moves_task_back_to_global_prior_state() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let cfg = cfg();
        std::fs::create_dir_all(path::management_root(dir.path())).unwrap();
        seed_task(dir.path(), &cfg, "150-wave1-demo", "todo");

        let session = session::create_session(dir.path(), &cfg, "sess3", "master").unwrap();
        claim_task(dir.path(), &cfg, "150-wave1-demo", &session.id).unwrap();
        let (task, _) = abort_task(dir.path(), &cfg, "150-wave1-demo", &session.id).unwrap();

        assert_eq!(task.state, "todo");
        assert!(task.session_id.is_none());
        assert!(path::tasks_root(dir.path()).join("todo/150-wave1-demo.md").is_file());
    }
}
