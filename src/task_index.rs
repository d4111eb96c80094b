//! Task Index: a filesystem scan over every Task/QA record — the global
//! tree plus every session's tree — rebuilt on demand. Edison keeps no
//! persistent index; the working set is small enough that a parallel
//! scan is cheaper than keeping a cache consistent.

use crate::core::config;
use crate::core::path;
use crate::core::value::Value;
use crate::entity::{self, FrontmatterEntity, Qa, Task};
use rayon::prelude::*;
use std::collections::BTreeMap;
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

/// Every tree root that can hold Task/QA records: the global tree plus
/// one pair of roots per session directory.
fn all_task_roots(project_root: &Path) -> Vec<PathBuf> {
    let mut roots = vec![path::tasks_root(project_root)];
    let sessions_dir = path::sessions_root(project_root);
    if let Ok(state_entries) = fs::read_dir(&sessions_dir) {
        for state_entry in state_entries.flatten() {
            if !state_entry.path().is_dir() {
                continue;
            }
            if let Ok(sess_entries) = fs::read_dir(state_entry.path()) {
                for sess_entry in sess_entries.flatten() {
                    roots.push(sess_entry.path().join("tasks"));
                }
            }
        }
    }
    roots
}

fn all_qa_roots(project_root: &Path) -> Vec<PathBuf> {
    let mut roots = vec![path::qa_root(project_root)];
    let sessions_dir = path::sessions_root(project_root);
    if let Ok(state_entries) = fs::read_dir(&sessions_dir) {
        for state_entry in state_entries.flatten() {
            if !state_entry.path().is_dir() {
                continue;
            }
            if let Ok(sess_entries) = fs::read_dir(state_entry.path()) {
                for sess_entry in sess_entries.flatten() {
                    roots.push(sess_entry.path().join("qa"));
                }
            }
        }
    }
    roots
}

fn scan_tasks_under(root: &Path, states: &[String]) -> Vec<Task> {
    states
        .par_iter()
        .flat_map(|state| {
            let dir = root.join(state);
            let Ok(entries) = fs::read_dir(&dir) else {
                return Vec::new();
            };
            entries
                .flatten()
                .filter_map(|entry| {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("md") {
                        return None;
                    }
                    let text = fs::read_to_string(&path).ok()?;
                    let (frontmatter, body) = entity::parse_frontmatter_document(&text).ok()?;
                    Task::from_parts(frontmatter, body, state.clone()).ok()
                })
                .collect::<Vec<Task>>()
        })
        .collect()
}

fn scan_qa_under(root: &Path, states: &[String]) -> Vec<Qa> {
    states
        .par_iter()
        .flat_map(|state| {
            let dir = root.join(state);
            let Ok(entries) = fs::read_dir(&dir) else {
                return Vec::new();
            };
            entries
                .flatten()
                .filter_map(|entry| {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("md") {
                        return None;
                    }
                    let text = fs::read_to_string(&path).ok()?;
                    let (frontmatter, body) = entity::parse_frontmatter_document(&text).ok()?;
                    Qa::from_parts(frontmatter, body, state.clone()).ok()
                })
                .collect::<Vec<Qa>>()
        })
        .collect()
}

/// A full in-memory snapshot of every Task/QA record, with the
/// secondary lookups the CLI and context payload builder need.
#[derive(Debug, Default)]
pub struct TaskIndex {
    pub tasks: Vec<Task>,
    pub qa: Vec<Qa>,
}

impl TaskIndex {
    pub fn by_state(&self) -> BTreeMap<String, Vec<&Task>> {
        let mut out: BTreeMap<String, Vec<&Task>> = BTreeMap::new();
        for t in &self.tasks {
            out.entry(t.state.clone()).or_default().push(t);
        }
        out
    }

    pub fn by_session(&self) -> BTreeMap<String, Vec<&Task>> {
        let mut out: BTreeMap<String, Vec<&Task>> = BTreeMap::new();
        for t in &self.tasks {
            if let Some(sid) = &t.session_id {
                out.entry(sid.clone()).or_default().push(t);
            }
        }
        out
    }

    pub fn children_by_parent(&self) -> BTreeMap<String, Vec<&Task>> {
        let mut out: BTreeMap<String, Vec<&Task>> = BTreeMap::new();
        for t in &self.tasks {
            if let Some(parent) = &t.parent_id {
                out.entry(parent.clone()).or_default().push(t);
            }
        }
        out
    }

    /// Every task that lists `task_id` in its `depends_on`.
    pub fn dependents_of<'a>(&'a self, task_id: &str) -> Vec<&'a Task> {
        self.tasks
            .iter()
            .filter(|t| t.depends_on.iter().any(|d| d == task_id))
            .collect()
    }

    pub fn find_task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn find_qa(&self, id: &str) -> Option<&Qa> {
        self.qa.iter().find(|q| q.id == id)
    }

    pub fn qa_for_task(&self, task_id: &str) -> Option<&Qa> {
        self.find_qa(&path::qa_id_for(task_id))
    }
}

/// Build a full index by scanning the global tree and every session's
/// tree in parallel. No persistent index is kept; call this fresh
/// whenever a consistent snapshot is needed.
pub fn build_index(project_root: &Path, cfg: &Value) -> TaskIndex {
    let task_states = task_states(cfg);
    let qa_states = qa_states(cfg);

    let task_roots = all_task_roots(project_root);
    let qa_roots = all_qa_roots(project_root);

    let tasks: Vec<Task> = task_roots
        .par_iter()
        .flat_map(|root| scan_tasks_under(root, &task_states))
        .collect();
    let qa: Vec<Qa> = qa_roots
        .par_iter()
        .flat_map(|root| scan_qa_under(root, &qa_states))
        .collect();

    TaskIndex { tasks, qa }
}
