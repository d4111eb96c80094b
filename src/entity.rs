//! Entity Repositories: frontmatter-bearing Markdown files for Task and
//! QA records. `save()` relocates the file when state changes and always
//! appends exactly one `StateTransition` entry.

use crate::core::atomic_io::{self, LockParams};
use crate::core::error::{EdisonError, Result};
use crate::core::time::now_rfc3339;
use crate::core::value::Value;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: String,
    pub to: String,
    pub at: String,
    pub reason: String,
    pub actor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(skip)]
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks_tasks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state_history: Vec<StateTransition>,
    #[serde(skip)]
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Qa {
    pub id: String,
    pub task_id: String,
    #[serde(skip)]
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state_history: Vec<StateTransition>,
    #[serde(skip)]
    pub body: String,
}

/// Shared shape required by the generic repository.
pub trait FrontmatterEntity: Sized + Clone {
    fn id(&self) -> &str;
    fn state(&self) -> &str;
    fn set_state(&mut self, state: &str);
    fn session_id(&self) -> Option<&str>;
    fn set_session_id(&mut self, session_id: Option<String>);
    fn touch_updated_at(&mut self);
    fn push_state_history(&mut self, t: StateTransition);
    fn file_stem(&self) -> String;
    fn to_frontmatter_value(&self) -> Value;
    fn body(&self) -> &str;
    fn from_parts(frontmatter: Value, body: String, state: String) -> Result<Self>;
}

impl FrontmatterEntity for Task {
    fn id(&self) -> &str {
        &self.id
    }
    fn state(&self) -> &str {
        &self.state
    }
    fn set_state(&mut self, state: &str) {
        self.state = state.to_string();
    }
    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
    fn set_session_id(&mut self, session_id: Option<String>) {
        self.session_id = session_id;
    }
    fn touch_updated_at(&mut self) {
        self.updated_at = now_rfc3339();
        self.last_active = Some(self.updated_at.clone());
    }
    fn push_state_history(&mut self, t: StateTransition) {
        self.state_history.push(t);
    }
    fn file_stem(&self) -> String {
        self.id.clone()
    }
    fn to_frontmatter_value(&self) -> Value {
        Value::from_json_value(serde_json::to_value(self).unwrap_or_default())
    }
    fn body(&self) -> &str {
        &self.body
    }
    fn from_parts(frontmatter: Value, body: String, state: String) -> Result<Self> {
        let mut task: Task =
            serde_json::from_value(frontmatter.to_json_value()).map_err(EdisonError::from)?;
        task.state = state;
        task.body = body;
        Ok(task)
    }
}

impl FrontmatterEntity for Qa {
    fn id(&self) -> &str {
        &self.id
    }
    fn state(&self) -> &str {
        &self.state
    }
    fn set_state(&mut self, state: &str) {
        self.state = state.to_string();
    }
    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
    fn set_session_id(&mut self, session_id: Option<String>) {
        self.session_id = session_id;
    }
    fn touch_updated_at(&mut self) {
        self.updated_at = now_rfc3339();
    }
    fn push_state_history(&mut self, t: StateTransition) {
        self.state_history.push(t);
    }
    fn file_stem(&self) -> String {
        self.id.clone()
    }
    fn to_frontmatter_value(&self) -> Value {
        Value::from_json_value(serde_json::to_value(self).unwrap_or_default())
    }
    fn body(&self) -> &str {
        &self.body
    }
    fn from_parts(frontmatter: Value, body: String, state: String) -> Result<Self> {
        let mut qa: Qa =
            serde_json::from_value(frontmatter.to_json_value()).map_err(EdisonError::from)?;
        qa.state = state;
        qa.body = body;
        Ok(qa)
    }
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, initial_state: &str) -> Self {
        let now = now_rfc3339();
        Self {
            id: id.into(),
            title: title.into(),
            state: initial_state.to_string(),
            session_id: None,
            parent_id: None,
            child_ids: Vec::new(),
            depends_on: Vec::new(),
            blocks_tasks: Vec::new(),
            owner: None,
            created_at: now.clone(),
            updated_at: now.clone(),
            last_active: Some(now),
            state_history: Vec::new(),
            body: String::new(),
        }
    }
}

impl Qa {
    pub fn new(task_id: &str, initial_state: &str) -> Self {
        let now = now_rfc3339();
        Self {
            id: format!("{task_id}-qa"),
            task_id: task_id.to_string(),
            state: initial_state.to_string(),
            session_id: None,
            owner: None,
            created_at: now.clone(),
            updated_at: now,
            state_history: Vec::new(),
            body: String::new(),
        }
    }
}

/// Split a Markdown-with-frontmatter document into `(frontmatter, body)`.
pub fn parse_frontmatter_document(text: &str) -> Result<(Value, String)> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rest = text
        .strip_prefix("---\n")
        .ok_or_else(|| EdisonError::EvidenceSchemaViolation("missing frontmatter delimiter".into()))?;
    let end = rest
        .find("\n---\n")
        .or_else(|| rest.find("\n---"))
        .ok_or_else(|| EdisonError::EvidenceSchemaViolation("unterminated frontmatter".into()))?;
    let yaml_part = &rest[..end];
    let after = &rest[end..];
    let body = after
        .strip_prefix("\n---\n")
        .or_else(|| after.strip_prefix("\n---"))
        .unwrap_or(after)
        .trim_start_matches('\n')
        .to_string();
    let frontmatter = Value::from_yaml_str(yaml_part).map_err(EdisonError::from)?;
    Ok((frontmatter, body))
}

/// Render a frontmatter document with sorted keys and a trailing newline.
pub fn render_frontmatter_document(frontmatter: &Value, body: &str) -> Result<String> {
    let yaml = atomic_io::to_sorted_yaml(frontmatter)?;
    let mut out = String::from("---\n");
    out.push_str(yaml.trim_end());
    out.push_str("\n---\n\n");
    out.push_str(body.trim_end());
    out.push('\n');
    Ok(out)
}

/// Generic repository over a frontmatter entity rooted at `base_root`,
/// with one subdirectory per state in `valid_states`.
pub struct MarkdownRepository<E: FrontmatterEntity> {
    base_root: PathBuf,
    valid_states: Vec<String>,
    suffix: &'static str,
    _marker: std::marker::PhantomData<E>,
}

impl<E: FrontmatterEntity> MarkdownRepository<E> {
    pub fn new(base_root: PathBuf, valid_states: Vec<String>, suffix: &'static str) -> Self {
        Self {
            base_root,
            valid_states,
            suffix,
            _marker: std::marker::PhantomData,
        }
    }

    fn state_dir(&self, state: &str) -> PathBuf {
        self.base_root.join(state)
    }

    fn path_for(&self, state: &str, id: &str) -> PathBuf {
        self.state_dir(state).join(format!("{id}{}", self.suffix))
    }

    /// Scan every valid state directory for `<id><suffix>`, returning the
    /// `(state, path)` of the first match found.
    pub fn locate(&self, id: &str) -> Option<(String, PathBuf)> {
        for state in &self.valid_states {
            let p = self.path_for(state, id);
            if p.is_file() {
                return Some((state.clone(), p));
            }
        }
        None
    }

    pub fn get(&self, id: &str) -> Result<Option<E>> {
        let Some((state, path)) = self.locate(id) else {
            return Ok(None);
        };
        let text = fs::read_to_string(&path)?;
        let (frontmatter, body) = parse_frontmatter_document(&text)?;
        Ok(Some(E::from_parts(frontmatter, body, state)?))
    }

    pub fn list_by_state(&self, state: &str) -> Result<Vec<E>> {
        let dir = self.state_dir(state);
        let mut out = Vec::new();
        let Ok(entries) = fs::read_dir(&dir) else {
            return Ok(out);
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let text = fs::read_to_string(&path)?;
            let (frontmatter, body) = parse_frontmatter_document(&text)?;
            out.push(E::from_parts(frontmatter, body, state.to_string())?);
        }
        out.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(out)
    }

    pub fn list_all(&self) -> Result<Vec<E>> {
        let mut out = Vec::new();
        for state in &self.valid_states {
            out.extend(self.list_by_state(state)?);
        }
        Ok(out)
    }

    /// Persist `entity`. If its current on-disk state differs from
    /// `entity.state()`, relocates atomically and appends exactly one
    /// `StateTransition` entry with `reason`/`actor`.
    pub fn save(&self, entity: &mut E, reason: &str, actor: &str) -> Result<()> {
        let id = entity.id().to_string();
        let new_state = entity.state().to_string();
        let previous = self.locate(&id);

        if let Some((old_state, _)) = &previous {
            if old_state != &new_state {
                entity.push_state_history(StateTransition {
                    from: old_state.clone(),
                    to: new_state.clone(),
                    at: now_rfc3339(),
                    reason: reason.to_string(),
                    actor: actor.to_string(),
                });
            }
        }
        entity.touch_updated_at();

        let new_path = self.path_for(&new_state, &id);
        let frontmatter = entity.to_frontmatter_value();
        let doc = render_frontmatter_document(&frontmatter, entity.body())?;
        atomic_io::atomic_write(&new_path, doc.as_bytes(), LockParams::default())?;

        if let Some((old_state, old_path)) = previous {
            if old_state != new_state {
                fs::remove_file(&old_path)?;
            }
        }
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        if let Some((_, path)) = self.locate(id) {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn base_root(&self) -> &Path {
        &self.base_root
    }
}

pub fn task_repository(base_root: PathBuf, valid_states: Vec<String>) -> MarkdownRepository<Task> {
    MarkdownRepository::new(base_root, valid_states, ".md")
}

pub fn qa_repository(base_root: PathBuf, valid_states: Vec<String>) -> MarkdownRepository<Qa> {
    MarkdownRepository::new(base_root, valid_states, ".md")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn states() -> Vec<String> {
        vec!["todo".into(), "wip".into(), "done".into(), "validated".into()]
    }

    #[test]
    fn frontmatter_round_trips() {
        let task = Task::new("150-wave1-demo", "Demo task", "todo");
        let doc = render_frontmatter_document(&task.to_frontmatter_value(), "Body text.").unwrap();
        let (fm, body) = parse_frontmatter_document(&doc).unwrap();
        assert_eq!(fm.get_path("id").unwrap().as_str(), Some("150-wave1-demo"));
        assert_eq!(body, "Body text.");
    }

    #[test]
    fn save_creates_file_at_state_directory() {
        let dir = tempdir().unwrap();
        let repo = task_repository(dir.path().to_path_buf(), states());
        let mut task = Task::new("150-wave1-demo", "Demo", "todo");
        repo.save(&mut task, "created", "system").unwrap();
        assert!(dir.path().join("todo/150-wave1-demo.md").is_file());
    }

    #[test]
    fn save_relocates_atomically_on_state_change() {
        let dir = tempdir().unwrap();
        let repo = task_repository(dir.path().to_path_buf(), states());
        let mut task = Task::new("150-wave1-demo", "Demo", "todo");
        repo.save(&mut task, "created", "system").unwrap();

        task.set_state("wip");
        repo.save(&mut task, "claimed", "agent-1").unwrap();

        assert!(!dir.path().join("todo/150-wave1-demo.md").exists());
        assert!(dir.path().join("wip/150-wave1-demo.md").is_file());
        assert_eq!(task.state_history.len(), 1);
        assert_eq!(task.state_history[0].from, "todo");
        assert_eq!(task.state_history[0].to, "wip");
        assert_eq!(task.state_history[0].reason, "claimed");
    }

    #[test]
    fn state_history_is_append_only_one_entry_per_transition() {
        let dir = tempdir().unwrap();
        let repo = task_repository(dir.path().to_path_buf(), states());
        let mut task = Task::new("150-wave1-demo", "Demo", "todo");
        repo.save(&mut task, "created", "system").unwrap();
        task.set_state("wip");
        repo.save(&mut task, "claimed", "a").unwrap();
        task.set_state("done");
        repo.save(&mut task, "completed", "a").unwrap();
        assert_eq!(task.state_history.len(), 2);
        assert_eq!(task.state_history[1].from, "wip");
        assert_eq!(task.state_history[1].to, "done");
    }

    #[test]
    fn list_by_state_sorts_by_id() {
        let dir = tempdir().unwrap();
        let repo = task_repository(dir.path().to_path_buf(), states());
        for id in ["b-task", "a-task"] {
            let mut t = Task::new(id, "t", "todo");
            repo.save(&mut t, "created", "system").unwrap();
        }
        let listed = repo.list_by_state("todo").unwrap();
        assert_eq!(listed[0].id, "a-task");
        assert_eq!(listed[1].id, "b-task");
    }

    #[test]
    fn qa_id_derives_with_reserved_suffix() {
        let qa = Qa::new("150-wave1-demo", "waiting");
        assert_eq!(qa.id, "150-wave1-demo-qa");
    }
}
