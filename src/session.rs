//! Session & Worktree Manager.
//!
//! A session is a unit of concurrent work isolated on its own git branch
//! and worktree. `session.json` lives at
//! `sessions/<state>/<id>/session.json`; task/QA files claimed into the
//! session live under `sessions/<state>/<id>/{tasks,qa}/<entity-state>/`.

use crate::core::atomic_io::{self, JsonWriteOptions, LockParams};
use crate::core::config;
use crate::core::error::{EdisonError, Result};
use crate::core::git;
use crate::core::path;
use crate::core::time::now_rfc3339;
use crate::core::value::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GitInfo {
    pub branch: String,
    pub base_branch: String,
    pub worktree_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub state: String,
    pub owner: Option<String>,
    pub git: GitInfo,
    pub created_at: String,
    pub updated_at: String,
}

impl Session {
    pub fn to_value(&self) -> Value {
        let mut v = Value::map();
        v.set_path("id", Value::String(self.id.clone()));
        v.set_path("state", Value::String(self.state.clone()));
        if let Some(owner) = &self.owner {
            v.set_path("owner", Value::String(owner.clone()));
        }
        v.set_path("git.branch", Value::String(self.git.branch.clone()));
        v.set_path("git.base_branch", Value::String(self.git.base_branch.clone()));
        v.set_path(
            "git.worktree_path",
            Value::String(self.git.worktree_path.display().to_string()),
        );
        v.set_path("created_at", Value::String(self.created_at.clone()));
        v.set_path("updated_at", Value::String(self.updated_at.clone()));
        v
    }

    pub fn from_value(v: &Value) -> Result<Self> {
        let id = v
            .get_path("id")
            .and_then(Value::as_str)
            .ok_or_else(|| EdisonError::Internal("session.json missing id".into()))?
            .to_string();
        let state = v
            .get_path("state")
            .and_then(Value::as_str)
            .unwrap_or("draft")
            .to_string();
        let owner = v.get_path("owner").and_then(Value::as_str).map(str::to_string);
        let branch = v
            .get_path("git.branch")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let base_branch = v
            .get_path("git.base_branch")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let worktree_path = v
            .get_path("git.worktree_path")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_default();
        let created_at = v
            .get_path("created_at")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let updated_at = v
            .get_path("updated_at")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            id,
            state,
            owner,
            git: GitInfo {
                branch,
                base_branch,
                worktree_path,
            },
            created_at,
            updated_at,
        })
    }
}

pub struct WorktreeTimeouts {
    pub health_check: Duration,
    pub fetch: Duration,
    pub checkout: Duration,
    pub worktree_add: Duration,
    pub clone: Duration,
    pub install: Duration,
    pub branch_check: Duration,
    pub prune: Duration,
}

impl WorktreeTimeouts {
    pub fn from_config(cfg: &Value) -> Self {
        let s = config::section(cfg, "session").get_subsection("worktree").get_subsection("timeouts");
        let secs = |key: &str, default: f64| -> Duration {
            Duration::from_secs_f64(
                s.get_path(key).and_then(Value::as_f64).unwrap_or(default),
            )
        };
        Self {
            health_check: secs("health_check", 5.0),
            fetch: secs("fetch", 60.0),
            checkout: secs("checkout", 30.0),
            worktree_add: secs("worktree_add", 30.0),
            clone: secs("clone", 120.0),
            install: secs("install", 120.0),
            branch_check: secs("branch_check", 5.0),
            prune: secs("prune", 30.0),
        }
    }
}

fn session_dir(project_root: &Path, state: &str, id: &str) -> PathBuf {
    path::sessions_root(project_root).join(state).join(id)
}

fn session_json_path(project_root: &Path, state: &str, id: &str) -> PathBuf {
    session_dir(project_root, state, id).join("session.json")
}

/// Find a session across any state directory, returning `(state, path)`.
pub fn locate_session(project_root: &Path, id: &str) -> Option<(String, PathBuf)> {
    let root = path::sessions_root(project_root);
    let entries = fs::read_dir(&root).ok()?;
    for state_entry in entries.flatten() {
        if !state_entry.path().is_dir() {
            continue;
        }
        let state = state_entry.file_name().to_string_lossy().to_string();
        let candidate = session_json_path(project_root, &state, id);
        if candidate.is_file() {
            return Some((state, candidate));
        }
    }
    None
}

pub fn load_session(project_root: &Path, id: &str) -> Result<Session> {
    let (_, path) = locate_session(project_root, id)
        .ok_or_else(|| EdisonError::NotFound(format!("session '{id}' not found")))?;
    let v = atomic_io::read_json(&path, LockParams::default())?;
    Session::from_value(&v)
}

fn save_session(project_root: &Path, session: &Session) -> Result<()> {
    let path = session_json_path(project_root, &session.state, &session.id);
    atomic_io::write_json(&path, &session.to_value(), &JsonWriteOptions::default(), LockParams::default())
}

/// Create (or idempotently reuse) a session and its worktree.
///
/// Reuse happens when a worktree for the computed branch already exists
/// and passes the health check (`git rev-parse --is-inside-work-tree`).
pub fn create_session(project_root: &Path, cfg: &Value, id: &str, base_branch: &str) -> Result<Session> {
    if let Ok(existing) = load_session(project_root, id) {
        return Ok(existing);
    }

    let worktree_cfg = config::section(cfg, "session").get_subsection("worktree");
    let base_dir = worktree_cfg
        .get_path("base_directory")
        .and_then(Value::as_str)
        .unwrap_or(".worktrees")
        .to_string();
    let branch_prefix = worktree_cfg
        .get_path("branch_prefix")
        .and_then(Value::as_str)
        .unwrap_or("edison")
        .to_string();
    let timeouts = WorktreeTimeouts::from_config(cfg);

    let branch = format!("{branch_prefix}/{id}");
    let worktree_path = project_root.join(&base_dir).join(id);

    if git::is_inside_work_tree(&worktree_path, timeouts.health_check) {
        // Reuse idempotently.
    } else {
        ensure_worktree(project_root, &worktree_path, &branch, base_branch, &timeouts)?;
    }

    let session_states = config::section(cfg, "session").get_subsection("states");
    let task_machine = crate::state_machine::MachineSpec::from_value(&session_states);
    let initial_state = task_machine.initial_state().unwrap_or("draft").to_string();

    let now = now_rfc3339();
    let session = Session {
        id: id.to_string(),
        state: initial_state,
        owner: None,
        git: GitInfo {
            branch,
            base_branch: base_branch.to_string(),
            worktree_path,
        },
        created_at: now.clone(),
        updated_at: now,
    };
    save_session(project_root, &session)?;
    Ok(session)
}

fn ensure_worktree(
    project_root: &Path,
    worktree_path: &Path,
    branch: &str,
    base_branch: &str,
    timeouts: &WorktreeTimeouts,
) -> Result<()> {
    if let Some(parent) = worktree_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let out = git::run_git(
        project_root,
        &[
            "worktree",
            "add",
            worktree_path.to_str().unwrap_or_default(),
            "-b",
            branch,
            base_branch,
        ],
        timeouts.worktree_add,
    )?;
    if !out.status_ok {
        return Err(EdisonError::WorktreeAddFailed(out.stderr.trim().to_string()));
    }
    Ok(())
}

/// Relocate a session to a new state, persisting `session.json` under the
/// new state directory.
pub fn transition_session(project_root: &Path, id: &str, new_state: &str) -> Result<Session> {
    let mut session = load_session(project_root, id)?;
    let old_state = session.state.clone();
    if old_state == new_state {
        return Ok(session);
    }
    session.state = new_state.to_string();
    session.updated_at = now_rfc3339();
    save_session(project_root, &session)?;
    let old_path = session_json_path(project_root, &old_state, id);
    if old_path.is_file() {
        fs::remove_file(&old_path)?;
    }
    Ok(session)
}

/// Archive a session's worktree: move it under
/// `session.worktree.archive_directory/<id>/`.
pub fn archive_worktree(project_root: &Path, cfg: &Value, session: &Session) -> Result<PathBuf> {
    let archive_dir_cfg = config::section(cfg, "session")
        .get_subsection("worktree")
        .get_path("archive_directory")
        .and_then(Value::as_str)
        .unwrap_or(".project/sessions/_archive")
        .to_string();
    let archive_root = project_root.join(archive_dir_cfg).join(&session.id);
    if session.git.worktree_path.is_dir() {
        if let Some(parent) = archive_root.parent() {
            fs::create_dir_all(parent)?;
        }
        if archive_root.exists() {
            fs::remove_dir_all(&archive_root)?;
        }
        fs::rename(&session.git.worktree_path, &archive_root)?;
    }
    Ok(archive_root)
}

/// Restore a worktree for a previously archived session on the same
/// branch, from the configured cache (i.e. creating a fresh worktree;
/// git itself is the cache of the branch's history).
pub fn restore_worktree(project_root: &Path, session: &Session, timeouts: &WorktreeTimeouts) -> Result<()> {
    if git::is_inside_work_tree(&session.git.worktree_path, timeouts.health_check) {
        return Ok(());
    }
    ensure_worktree(
        project_root,
        &session.git.worktree_path,
        &session.git.branch,
        &session.git.base_branch,
        timeouts,
    )
}

/// Remove a session's worktree (and optionally its branch). Idempotent:
/// tolerates an already-missing worktree/branch.
pub fn cleanup_worktree(
    project_root: &Path,
    worktree_path: &Path,
    branch: &str,
    delete_branch: bool,
    timeouts: &WorktreeTimeouts,
) -> Result<()> {
    if worktree_path.is_dir() {
        let _ = git::run_git(
            project_root,
            &["worktree", "remove", "--force", worktree_path.to_str().unwrap_or_default()],
            timeouts.worktree_add,
        );
        if worktree_path.is_dir() {
            fs::remove_dir_all(worktree_path)?;
        }
    }
    if delete_branch {
        let _ = git::run_git(project_root, &["branch", "-D", branch], timeouts.branch_check);
    }
    Ok(())
}

/// `git worktree prune`, optionally dry-run (`--dry-run`).
pub fn prune_worktrees(project_root: &Path, dry_run: bool, timeouts: &WorktreeTimeouts) -> Result<String> {
    let mut args = vec!["worktree", "prune"];
    if dry_run {
        args.push("--dry-run");
    }
    let out = git::run_git(project_root, &args, timeouts.prune)?;
    Ok(out.stdout)
}

// --- Shared-state meta worktree ---

pub struct MetaWorktreeSettings {
    pub branch: String,
    pub path: PathBuf,
    pub shared_paths: Vec<String>,
}

impl MetaWorktreeSettings {
    pub fn from_config(project_root: &Path, cfg: &Value) -> Self {
        let s = config::section(cfg, "session")
            .get_subsection("worktree")
            .get_subsection("shared_state");
        let branch = s
            .get_path("branch")
            .and_then(Value::as_str)
            .unwrap_or("edison-meta")
            .to_string();
        let path = project_root.join(
            s.get_path("path")
                .and_then(Value::as_str)
                .unwrap_or(".worktrees/_meta"),
        );
        let shared_paths = s.string_list("shared_paths");
        Self {
            branch,
            path,
            shared_paths,
        }
    }
}

/// `edison git worktree-meta-init`: create the shared-state meta worktree
/// if it does not already exist.
pub fn worktree_meta_init(project_root: &Path, cfg: &Value, base_branch: &str) -> Result<()> {
    let settings = MetaWorktreeSettings::from_config(project_root, cfg);
    let timeouts = WorktreeTimeouts::from_config(cfg);
    if git::is_inside_work_tree(&settings.path, timeouts.health_check) {
        return Ok(());
    }
    ensure_worktree(project_root, &settings.path, &settings.branch, base_branch, &timeouts)
}

pub fn meta_status(project_root: &Path, cfg: &Value) -> Result<bool> {
    let settings = MetaWorktreeSettings::from_config(project_root, cfg);
    let timeouts = WorktreeTimeouts::from_config(cfg);
    Ok(git::is_inside_work_tree(&settings.path, timeouts.health_check))
}

/// `edison git meta-commit -m <msg>`. Refuses when the meta worktree is
/// missing, the message is empty, or any staged path escapes the
/// configured `sharedPaths` prefixes. Never switches the primary
/// checkout's branch.
pub fn meta_commit(project_root: &Path, cfg: &Value, message: &str, paths: &[String]) -> Result<String> {
    if message.trim().is_empty() {
        return Err(EdisonError::ProtectedPathViolation(
            "meta-commit requires a non-empty message".into(),
        ));
    }
    let settings = MetaWorktreeSettings::from_config(project_root, cfg);
    let timeouts = WorktreeTimeouts::from_config(cfg);
    if !git::is_inside_work_tree(&settings.path, timeouts.health_check) {
        return Err(EdisonError::ProtectedPathViolation(
            "meta worktree does not exist; run `edison git worktree-meta-init` first".into(),
        ));
    }

    for p in paths {
        let allowed = settings.shared_paths.iter().any(|prefix| p.starts_with(prefix));
        if !allowed {
            return Err(EdisonError::ProtectedPathViolation(format!(
                "path '{p}' is outside the configured shared paths"
            )));
        }
    }

    let primary_branch_before = git::run_git_ok(
        project_root,
        &["rev-parse", "--abbrev-ref", "HEAD"],
        timeouts.branch_check,
    )?;

    for p in paths {
        git::run_git_ok(&settings.path, &["add", p], timeouts.checkout)?;
    }
    let commit_out = git::run_git_ok(&settings.path, &["commit", "-m", message], timeouts.checkout)?;

    let primary_branch_after = git::run_git_ok(
        project_root,
        &["rev-parse", "--abbrev-ref", "HEAD"],
        timeouts.branch_check,
    )?;
    if primary_branch_before.trim() != primary_branch_after.trim() {
        return Err(EdisonError::ProtectedPathViolation(
            "meta-commit must never switch the primary checkout's branch".into(),
        ));
    }

    Ok(commit_out)
}
