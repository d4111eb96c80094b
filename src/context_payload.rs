//! Context Payload Builder: a deterministic snapshot of a project (and,
//! optionally, an active session's) state for handing to an agent —
//! "what do you need to know before you touch anything". Field presence
//! is gated by `session.context.render.{markdown,next}.fields`; identity
//! fields are never dropped by gating or token trimming.

use crate::core::config;
use crate::core::path;
use crate::core::value::Value;
use crate::session::{self, Session};
use std::collections::BTreeMap;
use std::path::Path;

/// Fields that are always present regardless of field-gating config —
/// dropping any of these would leave the payload unable to answer "is
/// this even an Edison project, and who am I."
const IDENTITY_FIELDS: [&str; 2] = ["isEdisonProject", "projectRoot"];

#[derive(Debug, Clone, Default)]
pub struct ContextPayload {
    pub is_edison_project: bool,
    pub project_root: String,
    pub session_id: Option<String>,
    pub session_state: Option<String>,
    pub worktree_path: Option<String>,
    pub current_task_id: Option<String>,
    pub current_task_state: Option<String>,
    pub active_packs: Vec<String>,
    pub constitution_paths: Vec<String>,
    pub actor: String,
}

fn is_edison_project(project_root: &Path) -> bool {
    path::project_config_dir(project_root).is_dir() || path::management_root(project_root).is_dir()
}

fn constitution_paths(cfg: &Value) -> Vec<String> {
    crate::core::assets::list_embedded("constitutions/")
        .into_iter()
        .filter(|p| p.ends_with(".md"))
        .collect::<Vec<_>>()
        .into_iter()
        .chain(
            config::section(cfg, "workflow")
                .get_path("extra_constitutions")
                .and_then(Value::as_list)
                .map(|l| l.iter().filter_map(|v| v.as_str().map(str::to_string)).collect::<Vec<_>>())
                .unwrap_or_default(),
        )
        .collect()
}

/// Find a task by id across the global tree and every session tree,
/// returning `(state, session_id)` without materializing the whole
/// record — a lighter-weight lookup than [`crate::task_index::build_index`]
/// for the single-task case the context payload needs.
fn locate_task_state(project_root: &Path, cfg: &Value, task_id: &str) -> Option<(String, Option<String>)> {
    let idx = crate::task_index::build_index(project_root, cfg);
    idx.find_task(task_id)
        .map(|t| (t.state.clone(), t.session_id.clone()))
}

/// Build the context payload for `project_root`, optionally scoped to
/// `session_id` and a `current_task_id` the caller already knows about
/// (e.g. from `edison task claim`'s own return value).
pub fn build_context(
    project_root: &Path,
    cfg: &Value,
    session_id: Option<&str>,
    current_task_id: Option<&str>,
) -> ContextPayload {
    let mut payload = ContextPayload {
        is_edison_project: is_edison_project(project_root),
        project_root: project_root.display().to_string(),
        active_packs: config::section(cfg, "packs").string_list("active"),
        constitution_paths: constitution_paths(cfg),
        actor: config::section(cfg, "workflow").str("default_actor", "system"),
        ..Default::default()
    };

    if let Some(sid) = session_id {
        if let Ok(session) = session::load_session(project_root, sid) {
            payload.session_id = Some(session.id.clone());
            payload.session_state = Some(session.state.clone());
            payload.worktree_path = Some(session.git.worktree_path.display().to_string());
        }
    }

    if let Some(task_id) = current_task_id {
        payload.current_task_id = Some(task_id.to_string());
        if let Some((state, task_session)) = locate_task_state(project_root, cfg, task_id) {
            payload.current_task_state = Some(state);
            if payload.session_id.is_none() {
                if let Some(sid) = task_session {
                    if let Ok(session) = session::load_session(project_root, &sid) {
                        payload.session_id = Some(session.id.clone());
                        payload.session_state = Some(session.state.clone());
                        payload.worktree_path = Some(session.git.worktree_path.display().to_string());
                    }
                }
            }
        }
    }

    payload
}

fn flatten(payload: &ContextPayload) -> BTreeMap<&'static str, String> {
    let mut m = BTreeMap::new();
    m.insert("isEdisonProject", payload.is_edison_project.to_string());
    m.insert("projectRoot", payload.project_root.clone());
    if let Some(v) = &payload.session_id {
        m.insert("sessionId", v.clone());
    }
    if let Some(v) = &payload.session_state {
        m.insert("sessionState", v.clone());
    }
    if let Some(v) = &payload.worktree_path {
        m.insert("worktreePath", v.clone());
    }
    if let Some(v) = &payload.current_task_id {
        m.insert("currentTaskId", v.clone());
    }
    if let Some(v) = &payload.current_task_state {
        m.insert("currentTaskState", v.clone());
    }
    if !payload.active_packs.is_empty() {
        m.insert("activePacks", payload.active_packs.join(", "));
    }
    m.insert("actor", payload.actor.clone());
    m
}

/// Apply the configured field allow-list, gated by `render_key`
/// (`"markdown"` or `"next"`): an empty `fields` list means "no gating,
/// render everything"; a non-empty list restricts to its entries plus
/// the always-present identity fields.
fn gated_fields(cfg: &Value, render_key: &str, all: BTreeMap<&'static str, String>) -> BTreeMap<&'static str, String> {
    let allow = config::section(cfg, "session")
        .get_subsection("context")
        .get_subsection("render")
        .get_subsection(render_key)
        .get_path("fields")
        .and_then(Value::as_list)
        .map(|l| l.iter().filter_map(|v| v.as_str().map(str::to_string)).collect::<Vec<_>>())
        .unwrap_or_default();
    if allow.is_empty() {
        return all;
    }
    all.into_iter()
        .filter(|(k, _)| IDENTITY_FIELDS.contains(k) || allow.iter().any(|a| a == k))
        .collect()
}

/// Render as a Markdown block (`**Key:** value` lines) for human/agent
/// consumption in `CLAUDE.md`-style injected context.
pub fn render_markdown(payload: &ContextPayload, cfg: &Value) -> String {
    let fields = gated_fields(cfg, "markdown", flatten(payload));
    let mut out = String::from("## Edison Context\n\n");
    for (k, v) in fields {
        out.push_str(&format!("- **{k}:** {v}\n"));
    }
    out
}

/// Render as a flat bullet list for the "next step" prompt surface.
pub fn render_next(payload: &ContextPayload, cfg: &Value) -> String {
    let fields = gated_fields(cfg, "next", flatten(payload));
    fields
        .into_iter()
        .map(|(k, v)| format!("- {k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Trim a rendered context string to at most `max_tokens`, counted with
/// the configured tokenizer. Trims whole lines from the end, never the
/// identity lines (`isEdisonProject`/`projectRoot`), which always sort
/// first since [`flatten`] is a `BTreeMap`.
pub fn trim_to_token_budget(rendered: &str, max_tokens: usize) -> String {
    let bpe = match tiktoken_rs::cl100k_base() {
        Ok(bpe) => bpe,
        Err(_) => return rendered.to_string(),
    };
    if bpe.encode_with_special_tokens(rendered).len() <= max_tokens {
        return rendered.to_string();
    }

    let lines: Vec<&str> = rendered.lines().collect();
    let mut kept: Vec<&str> = Vec::new();
    let mut budget_used = 0usize;
    for (i, line) in lines.iter().enumerate() {
        let is_identity = i < 3; // heading + up to two identity lines
        let tokens = bpe.encode_with_special_tokens(line).len() + 1;
        if !is_identity && budget_used + tokens > max_tokens {
            break;
        }
        kept.push(line);
        budget_used += tokens;
    }
    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cfg() -> Value {
        crate::core::assets::read_embedded_yaml("config/defaults.yaml").unwrap()
    }

    #[test]
    fn non_edison_dir_reports_false() {
        let dir = tempdir().unwrap();
        let payload = build_context(dir.path(), &cfg(), None, None);
        assert!(!payload.is_edison_project);
    }

    #[test]
    fn edison_project_marker_is_detected() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(path::project_config_dir(dir.path())).unwrap();
        let payload = build_context(dir.path(), &cfg(), None, None);
        assert!(payload.is_edison_project);
    }

    #[test]
    fn render_markdown_includes_identity_fields() {
        let dir = tempdir().unwrap();
        let payload = build_context(dir.path(), &cfg(), None, None);
        let out = render_markdown(&payload, &cfg());
        assert!(out.contains("isEdisonProject"));
        assert!(out.contains("projectRoot"));
    }

    #[test]
    fn gating_empty_fields_list_renders_everything() {
        let dir = tempdir().unwrap();
        let payload = build_context(dir.path(), &cfg(), None, None);
        let next = render_next(&payload, &cfg());
        assert!(next.contains("actor"));
    }

    #[test]
    fn gating_restricts_to_allow_list_plus_identity() {
        let dir = tempdir().unwrap();
        let mut c = cfg();
        c.set_path(
            "session.context.render.next.fields",
            Value::List(vec![Value::String("actor".into())]),
        );
        let payload = build_context(dir.path(), &c, None, None);
        let next = render_next(&payload, &c);
        assert!(next.contains("actor"));
        assert!(next.contains("isEdisonProject"));
        assert!(!next.contains("activePacks"));
    }

    #[test]
    fn trim_to_token_budget_is_noop_under_budget() {
        let rendered = "## Edison Context\n\n- **isEdisonProject:** true\n";
        let trimmed = trim_to_token_budget(rendered, 10_000);
        assert_eq!(trimmed, rendered);
    }
}
