//! Path & Identity Resolver.
//!
//! Resolves the project root, the management directory (`.project/`) and
//! the Edison config directory (`.edison/`), and normalizes entity ids.
//! Resolution is cached per-process, keyed by the starting directory.

use crate::core::error::{EdisonError, Result};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub const MANAGEMENT_DIR_NAME: &str = ".project";
pub const CONFIG_DIR_NAME: &str = ".edison";
const PROJECT_ROOT_ENV: &str = "AGENTS_PROJECT_ROOT";

fn root_cache() -> &'static Mutex<HashMap<PathBuf, PathBuf>> {
    static CACHE: OnceLock<Mutex<HashMap<PathBuf, PathBuf>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Clears all process-wide caches. Test-only hook per the "configured
/// singletons" design note.
pub fn clear_all_caches() {
    root_cache().lock().unwrap_or_else(|e| e.into_inner()).clear();
}

fn has_management_marker(dir: &Path) -> bool {
    dir.join(MANAGEMENT_DIR_NAME).is_dir() || dir.join(CONFIG_DIR_NAME).is_dir()
}

fn has_git_marker(dir: &Path) -> bool {
    dir.join(".git").exists()
}

fn walk_ancestors_for<F: Fn(&Path) -> bool>(start: &Path, pred: F) -> Option<PathBuf> {
    let mut cur = Some(start);
    while let Some(dir) = cur {
        if pred(dir) {
            return Some(dir.to_path_buf());
        }
        cur = dir.parent();
    }
    None
}

/// Resolve the project root: explicit override -> `AGENTS_PROJECT_ROOT` env
/// -> nearest ancestor with a management marker -> nearest git root.
pub fn resolve_project_root(explicit: Option<&Path>, start: Option<&Path>) -> Result<PathBuf> {
    let start_dir = start
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }

    let cache_key = start_dir.clone();
    if let Some(cached) = root_cache().lock().unwrap_or_else(|e| e.into_inner()).get(&cache_key) {
        return Ok(cached.clone());
    }

    if let Ok(env_root) = env::var(PROJECT_ROOT_ENV) {
        if !env_root.is_empty() {
            let p = PathBuf::from(env_root);
            root_cache()
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(cache_key, p.clone());
            return Ok(p);
        }
    }

    let resolved = walk_ancestors_for(&start_dir, has_management_marker)
        .or_else(|| walk_ancestors_for(&start_dir, has_git_marker))
        .ok_or(EdisonError::ProjectRootNotFound)?;

    root_cache()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(cache_key, resolved.clone());
    Ok(resolved)
}

pub fn management_root(project_root: &Path) -> PathBuf {
    project_root.join(MANAGEMENT_DIR_NAME)
}

pub fn project_config_dir(project_root: &Path) -> PathBuf {
    project_root.join(CONFIG_DIR_NAME)
}

pub fn tasks_root(project_root: &Path) -> PathBuf {
    management_root(project_root).join("tasks")
}

pub fn qa_root(project_root: &Path) -> PathBuf {
    management_root(project_root).join("qa")
}

pub fn sessions_root(project_root: &Path) -> PathBuf {
    management_root(project_root).join("sessions")
}

pub fn evidence_root(project_root: &Path, task_id: &str) -> PathBuf {
    qa_root(project_root)
        .join("validation-evidence")
        .join(task_id)
}

/// Is this a QA record id? Detection is suffix-based, not substring:
/// `"foo-qa"` and `"foo.qa"` qualify; `"foo-qawait"` does not.
pub fn is_qa_id(id: &str) -> bool {
    id.ends_with("-qa") || id.ends_with(".qa")
}

/// Normalize the base task id a QA id refers to, stripping the reserved
/// suffix. Returns the input unchanged if it is not a QA id.
pub fn task_id_for(id: &str) -> &str {
    if let Some(stripped) = id.strip_suffix("-qa") {
        stripped
    } else if let Some(stripped) = id.strip_suffix(".qa") {
        stripped
    } else {
        id
    }
}

pub fn qa_id_for(task_id: &str) -> String {
    format!("{task_id}-qa")
}

/// Expand a short token to a unique full id by scanning `<token>-*` entries
/// under every directory in `search_dirs`. Fails closed with a sorted,
/// truncated (first 10) candidate list on ambiguity; returns `None` if no
/// candidate matches (caller decides whether that's an error).
///
/// Note: only the `<token>-*` form is matched. A task whose canonical id is
/// the bare token with no suffix will not match — this mirrors a known gap
/// in the source implementation that is preserved rather than "fixed".
pub fn expand_short_id(token: &str, search_dirs: &[PathBuf]) -> Result<Option<String>> {
    let mut candidates: Vec<String> = Vec::new();
    let prefix = format!("{token}-");
    for dir in search_dirs {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            let Some(stem) = name.strip_suffix(".md") else {
                continue;
            };
            if stem.starts_with(&prefix) {
                candidates.push(stem.to_string());
            }
        }
    }
    candidates.sort();
    candidates.dedup();
    match candidates.len() {
        0 => Ok(None),
        1 => Ok(Some(candidates.remove(0))),
        _ => {
            let shown: Vec<String> = candidates.into_iter().take(10).collect();
            Err(EdisonError::AmbiguousId {
                token: token.to_string(),
                candidates: shown,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn qa_suffix_detection_is_suffix_based() {
        assert!(is_qa_id("150-qa"));
        assert!(is_qa_id("150.qa"));
        assert!(!is_qa_id("150-qawait"));
        assert!(!is_qa_id("qa-150"));
    }

    #[test]
    fn task_id_for_strips_known_suffixes() {
        assert_eq!(task_id_for("150-qa"), "150");
        assert_eq!(task_id_for("150.qa"), "150");
        assert_eq!(task_id_for("150"), "150");
    }

    #[test]
    fn resolve_project_root_finds_management_marker() {
        clear_all_caches();
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".project")).unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        let root = resolve_project_root(None, Some(&nested)).unwrap();
        assert_eq!(root, dir.path());
    }

    #[test]
    fn resolve_project_root_falls_back_to_git_root() {
        clear_all_caches();
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let root = resolve_project_root(None, Some(dir.path())).unwrap();
        assert_eq!(root, dir.path());
    }

    #[test]
    fn resolve_project_root_not_found_errors() {
        clear_all_caches();
        let dir = tempdir().unwrap();
        let err = resolve_project_root(None, Some(dir.path())).unwrap_err();
        assert!(matches!(err, EdisonError::ProjectRootNotFound));
    }

    #[test]
    fn expand_short_id_ambiguous_fails_closed_sorted_and_truncated() {
        let dir = tempdir().unwrap();
        for i in 0..12 {
            std::fs::write(dir.path().join(format!("150-variant-{i:02}.md")), "").unwrap();
        }
        let err = expand_short_id("150", &[dir.path().to_path_buf()]).unwrap_err();
        match err {
            EdisonError::AmbiguousId { candidates, .. } => {
                assert_eq!(candidates.len(), 10);
                let mut sorted = candidates.clone();
                sorted.sort();
                assert_eq!(candidates, sorted);
            }
            _ => panic!("expected AmbiguousId"),
        }
    }

    #[test]
    fn expand_short_id_unique_match() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("150-wave1-demo.md"), "").unwrap();
        let found = expand_short_id("150", &[dir.path().to_path_buf()])
            .unwrap()
            .unwrap();
        assert_eq!(found, "150-wave1-demo");
    }
}
