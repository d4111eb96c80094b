//! Rules Engine: merges the core rule registry with active packs' and the
//! project's registries, then selects and renders the rules relevant to
//! a role/context/transition for injection into agent context.

use crate::core::assets;
use crate::core::config;
use crate::core::path;
use crate::core::value::Value;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub blocking: bool,
    #[serde(default)]
    pub applies_to: Vec<String>,
    #[serde(default)]
    pub transition: Option<String>,
    #[serde(default)]
    pub guidance: String,
}

fn rules_from_yaml(value: &Value) -> Vec<Rule> {
    let Some(list) = value.get_path("rules").and_then(Value::as_list) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|v| serde_json::from_value(v.to_json_value()).ok())
        .collect()
}

fn read_project_registry(project_root: &Path) -> Vec<Rule> {
    let p = path::project_config_dir(project_root)
        .join("rules")
        .join("registry.yml");
    std::fs::read_to_string(&p)
        .ok()
        .and_then(|s| Value::from_yaml_str(&s).ok())
        .map(|v| rules_from_yaml(&v))
        .unwrap_or_default()
}

fn read_bundled_pack_registry(pack: &str) -> Vec<Rule> {
    assets::read_embedded_yaml(&format!("packs/{pack}/rules/registry.yml"))
        .map(|v| rules_from_yaml(&v))
        .unwrap_or_default()
}

fn read_project_pack_registry(project_root: &Path, pack: &str) -> Vec<Rule> {
    let p = path::project_config_dir(project_root)
        .join("packs")
        .join(pack)
        .join("rules")
        .join("registry.yml");
    std::fs::read_to_string(&p)
        .ok()
        .and_then(|s| Value::from_yaml_str(&s).ok())
        .map(|v| rules_from_yaml(&v))
        .unwrap_or_default()
}

/// Insert or replace-in-place by `id`, preserving first-seen ordering
/// while letting a later layer's rule win on content.
fn upsert_all(merged: &mut Vec<Rule>, rules: Vec<Rule>) {
    for rule in rules {
        if let Some(existing) = merged.iter_mut().find(|r| r.id == rule.id) {
            *existing = rule;
        } else {
            merged.push(rule);
        }
    }
}

/// Merge core + every active pack's (bundled then project-overridden) +
/// the project's own registry. Later sources win on a shared `id`
/// (last-one-wins, matching the registry file's own stated contract).
pub fn load_registry(project_root: &Path, cfg: &Value) -> Vec<Rule> {
    let mut merged: Vec<Rule> = Vec::new();

    upsert_all(
        &mut merged,
        rules_from_yaml(&assets::read_embedded_yaml("rules/registry.yml").unwrap_or_else(Value::map)),
    );

    let active_packs = config::section(cfg, "packs").string_list("active");
    for pack in &active_packs {
        upsert_all(&mut merged, read_bundled_pack_registry(pack));
        upsert_all(&mut merged, read_project_pack_registry(project_root, pack));
    }

    upsert_all(&mut merged, read_project_registry(project_root));

    merged
}

/// Canonical `state -> transition` mapping used when a caller supplies a
/// bare target state rather than an explicit `"from->to"` transition id.
/// Falls back to the identity transition (`"<state>-><state>"`) for any
/// state not named in `rules.transition_map`.
pub fn canonical_transition(cfg: &Value, state: &str) -> String {
    config::section(cfg, "rules")
        .get_subsection("transition_map")
        .get_path(state)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{state}->{state}"))
}

/// Select rules applicable to `role` (an `applies_to` entry), optionally
/// narrowed further by `category` and/or `transition`. A rule with no
/// `transition` field applies to every transition; a rule with no
/// `category` is never filtered out by a category query (categories on
/// rules are always populated in practice, but an empty category on the
/// query side means "don't filter").
pub fn select_rules<'a>(
    rules: &'a [Rule],
    role: &str,
    category: Option<&str>,
    transition: Option<&str>,
) -> Vec<&'a Rule> {
    rules
        .iter()
        .filter(|r| r.applies_to.iter().any(|a| a == role))
        .filter(|r| category.map(|c| r.category == c).unwrap_or(true))
        .filter(|r| {
            transition
                .map(|t| r.transition.as_deref().map(|rt| rt == t).unwrap_or(true))
                .unwrap_or(true)
        })
        .collect()
}

/// Render selected rules as a Markdown bullet list for agent-context
/// injection: `- **Title** (blocking): guidance` or `- Title: guidance`
/// for non-blocking rules.
pub fn render_markdown(rules: &[&Rule]) -> String {
    let mut out = String::new();
    for rule in rules {
        if rule.blocking {
            out.push_str(&format!("- **{}** (blocking): {}\n", rule.title, rule.guidance.trim()));
        } else {
            out.push_str(&format!("- {}: {}\n", rule.title, rule.guidance.trim()));
        }
    }
    out
}
