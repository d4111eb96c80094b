//! Validation Policy Resolver: classifies changed files, infers or
//! accepts an explicit validation preset, and builds the escalation
//! reason text when the inferred preset outranks the configured default.

use crate::core::config;
use crate::core::error::{EdisonError, Result};
use crate::core::glob;
use crate::core::value::Value;
use std::collections::BTreeMap;

/// File classification order: first match wins. Doc comes before code
/// and config so a changed `README.md` inside `src/` still counts as
/// documentation, not code.
const CLASSIFICATION_ORDER: [&str; 3] = ["doc", "code", "config"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Doc,
    Code,
    Config,
    Other,
}

impl FileCategory {
    fn as_str(self) -> &'static str {
        match self {
            FileCategory::Doc => "doc",
            FileCategory::Code => "code",
            FileCategory::Config => "config",
            FileCategory::Other => "other",
        }
    }
}

pub fn classify_file(cfg: &Value, path: &str) -> FileCategory {
    let classification = config::section(cfg, "validation").get_subsection("file_classification");
    for category in CLASSIFICATION_ORDER {
        let patterns = classification.string_list(category);
        if glob::any_match(&patterns, path) {
            return match category {
                "doc" => FileCategory::Doc,
                "code" => FileCategory::Code,
                "config" => FileCategory::Config,
                _ => unreachable!(),
            };
        }
    }
    FileCategory::Other
}

#[derive(Debug, Clone)]
pub struct ValidationPreset {
    pub id: String,
    pub description: Option<String>,
    pub validators: Vec<String>,
    pub required_evidence: Vec<String>,
    pub blocking_validators: Vec<String>,
    pub stale_evidence: Option<String>,
    pub escalates_to: Option<String>,
}

fn load_preset(cfg: &Value, id: &str) -> Result<ValidationPreset> {
    let presets = config::section(cfg, "validation").get_subsection("presets");
    let preset_value = presets.get_path(id).cloned().ok_or_else(|| {
        EdisonError::ConfigSectionMissing(format!("validation.presets.{id}"))
    })?;

    let required_evidence = match preset_value.get_path("required_evidence") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => v
            .as_list()
            .map(|l| l.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
            .ok_or_else(|| {
                EdisonError::InvalidPresetField {
                    preset: id.to_string(),
                    field: "required_evidence".to_string(),
                }
            })?,
    };

    Ok(ValidationPreset {
        id: id.to_string(),
        description: preset_value.get_path("description").and_then(Value::as_str).map(str::to_string),
        validators: preset_value.string_list("validators"),
        required_evidence,
        blocking_validators: preset_value.string_list("blocking_validators"),
        stale_evidence: preset_value.get_path("stale_evidence").and_then(Value::as_str).map(str::to_string),
        escalates_to: preset_value.get_path("escalates_to").and_then(Value::as_str).map(str::to_string),
    })
}

#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub preset: ValidationPreset,
    pub escalated_from: Option<String>,
    pub escalation_reason: Option<String>,
}

/// Up to 3 example paths, comma-joined, for one category's escalation
/// clause: `"code changes: a.rs, b.rs, c.rs"`.
fn category_clause(category: FileCategory, files: &[String]) -> Option<String> {
    if files.is_empty() {
        return None;
    }
    let examples: Vec<&str> = files.iter().take(3).map(String::as_str).collect();
    Some(format!("{} changes: {}", category.as_str(), examples.join(", ")))
}

/// Resolve the validation policy for a task, given the optional explicit
/// preset id and the optional list of changed file paths.
pub fn resolve_policy(
    cfg: &Value,
    explicit_preset: Option<&str>,
    changed_files: &[String],
) -> Result<ValidationPolicy> {
    let default_preset_id = config::section(cfg, "validation")
        .get_path("default_preset")
        .and_then(Value::as_str)
        .unwrap_or("quick")
        .to_string();

    if let Some(id) = explicit_preset {
        if config::section(cfg, "validation")
            .get_subsection("presets")
            .get_path(id)
            .is_some()
        {
            return Ok(ValidationPolicy {
                preset: load_preset(cfg, id)?,
                escalated_from: None,
                escalation_reason: None,
            });
        }
    }

    let mut by_category: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
    for file in changed_files {
        let category = classify_file(cfg, file);
        by_category.entry(category.as_str()).or_default().push(file.clone());
    }

    let all_doc = changed_files
        .iter()
        .all(|f| classify_file(cfg, f) == FileCategory::Doc);
    let inferred_id = if changed_files.is_empty() {
        default_preset_id.clone()
    } else if all_doc {
        "quick".to_string()
    } else {
        "standard".to_string()
    };

    let preset = load_preset(cfg, &inferred_id)?;

    if inferred_id == default_preset_id {
        return Ok(ValidationPolicy {
            preset,
            escalated_from: None,
            escalation_reason: None,
        });
    }

    let mut clauses = Vec::new();
    if let Some(files) = by_category.get("code") {
        if let Some(clause) = category_clause(FileCategory::Code, files) {
            clauses.push(clause);
        }
    }
    if let Some(files) = by_category.get("config") {
        if let Some(clause) = category_clause(FileCategory::Config, files) {
            clauses.push(clause);
        }
    }
    let escalation_reason = if clauses.is_empty() {
        None
    } else {
        Some(format!(
            "Escalated from {default_preset_id} to {inferred_id} due to {}",
            clauses.join("; ")
        ))
    };

    Ok(ValidationPolicy {
        preset,
        escalated_from: Some(default_preset_id),
        escalation_reason,
    })
}
