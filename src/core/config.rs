//! Layered Config Resolver.
//!
//! Two-phase load: (a) merge bundled defaults with project config to
//! discover `packs.active`; (b) re-merge `core -> each active pack
//! (bundled path, then project path) -> project config -> environment
//! overlay`. Dicts merge recursively; lists and scalars replace. Results
//! are cached per `(repo_root, include_packs)` since both are valid views.

use crate::core::assets;
use crate::core::error::Result;
use crate::core::path;
use crate::core::value::Value;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    repo_root: PathBuf,
    include_packs: bool,
}

fn config_cache() -> &'static Mutex<HashMap<CacheKey, Value>> {
    static CACHE: OnceLock<Mutex<HashMap<CacheKey, Value>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn clear_all_caches() {
    config_cache().lock().unwrap_or_else(|e| e.into_inner()).clear();
}

fn project_config_path(project_root: &Path) -> PathBuf {
    path::project_config_dir(project_root).join("config").join("project.yaml")
}

fn load_project_config(project_root: &Path) -> Value {
    let p = project_config_path(project_root);
    std::fs::read_to_string(&p)
        .ok()
        .and_then(|s| Value::from_yaml_str(&s).ok())
        .unwrap_or_else(Value::map)
}

fn bundled_pack_config(pack: &str) -> Value {
    assets::read_embedded_yaml(&format!("packs/{pack}/config/pack.yaml")).unwrap_or_else(Value::map)
}

fn project_pack_config(project_root: &Path, pack: &str) -> Value {
    let p = path::project_config_dir(project_root)
        .join("packs")
        .join(pack)
        .join("config")
        .join("pack.yaml");
    std::fs::read_to_string(&p)
        .ok()
        .and_then(|s| Value::from_yaml_str(&s).ok())
        .unwrap_or_else(Value::map)
}

fn core_defaults() -> Value {
    assets::read_embedded_yaml("config/defaults.yaml").unwrap_or_else(Value::map)
}

fn active_packs(merged_so_far: &Value) -> Vec<String> {
    merged_so_far
        .get_path("packs.active")
        .and_then(Value::as_list)
        .map(|list| {
            list.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn coerce_env_leaf(raw: &str) -> Value {
    if let Ok(b) = raw.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Float(f);
    }
    Value::String(raw.to_string())
}

/// Collect `EDISON_<a>_<b>...` environment variables into a config overlay
/// `{a: {b: value}}`. Section/key names are lower-cased; values are
/// coerced to bool/int/float and fall back to string.
fn env_overlay() -> Value {
    let mut overlay = Value::map();
    for (key, val) in env::vars() {
        let Some(rest) = key.strip_prefix("EDISON_") else {
            continue;
        };
        let parts: Vec<&str> = rest.split('_').filter(|p| !p.is_empty()).collect();
        if parts.len() < 2 {
            continue;
        }
        let path_str = parts
            .iter()
            .map(|p| p.to_lowercase())
            .collect::<Vec<_>>()
            .join(".");
        overlay.set_path(&path_str, coerce_env_leaf(&val));
    }
    overlay
}

/// Load the fully merged configuration for `project_root`.
///
/// When `include_packs` is false, phase (b) skips the pack layers
/// entirely (core -> project -> env); this is used by callers that must
/// not be influenced by pack state (e.g. discovering which packs are
/// active in the first place).
pub fn load_config(project_root: &Path, include_packs: bool) -> Value {
    let key = CacheKey {
        repo_root: project_root.to_path_buf(),
        include_packs,
    };
    if let Some(cached) = config_cache().lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
        return cached.clone();
    }

    let core = core_defaults();
    let project = load_project_config(project_root);

    // Phase (a): discover active packs from a core+project merge.
    let discovery_merge = core.deep_merge(&project);
    let packs = if include_packs {
        active_packs(&discovery_merge)
    } else {
        Vec::new()
    };

    // Phase (b): core -> each active pack (bundled, then project) -> project -> env.
    let mut layers = vec![core];
    for pack in &packs {
        layers.push(bundled_pack_config(pack));
        layers.push(project_pack_config(project_root, pack));
    }
    layers.push(project);
    layers.push(env_overlay());

    let merged = Value::merge_all(layers.iter());
    config_cache()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(key, merged.clone());
    merged
}

/// Domain façade: tolerant accessor over a named top-level section.
pub struct SectionConfig {
    section: Value,
}

impl SectionConfig {
    pub fn new(cfg: &Value, name: &str) -> Self {
        Self {
            section: cfg.get_subsection(name),
        }
    }

    pub fn get_subsection(&self, name: &str) -> Value {
        self.section.get_subsection(name)
    }

    pub fn get_path(&self, path: &str) -> Option<&Value> {
        self.section.get_path(path)
    }

    pub fn raw(&self) -> &Value {
        &self.section
    }

    pub fn str(&self, path: &str, default: &str) -> String {
        self.get_path(path)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn f64(&self, path: &str, default: f64) -> f64 {
        self.get_path(path).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn bool(&self, path: &str, default: bool) -> bool {
        self.get_path(path).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn string_list(&self, path: &str) -> Vec<String> {
        self.get_path(path)
            .and_then(Value::as_list)
            .map(|l| l.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }
}

pub fn section(cfg: &Value, name: &str) -> SectionConfig {
    SectionConfig::new(cfg, name)
}

#[derive(Debug, Clone, Copy)]
pub struct FileLockingConfig {
    pub timeout_seconds: f64,
    pub poll_interval_seconds: f64,
    pub fail_open: bool,
}

pub fn file_locking_config(cfg: &Value) -> FileLockingConfig {
    let s = section(cfg, "file_locking");
    FileLockingConfig {
        timeout_seconds: s.f64("timeout_seconds", 10.0),
        poll_interval_seconds: s.f64("poll_interval_seconds", 0.05),
        fail_open: s.bool("fail_open", false),
    }
}

impl From<FileLockingConfig> for crate::core::atomic_io::LockParams {
    fn from(c: FileLockingConfig) -> Self {
        crate::core::atomic_io::LockParams {
            timeout_seconds: c.timeout_seconds,
            poll_interval_seconds: c.poll_interval_seconds,
            fail_open: c.fail_open,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutsConfig {
    values: Value,
}

impl TimeoutsConfig {
    pub fn seconds_for(&self, key: &str, default: f64) -> f64 {
        self.values.get_path(key).and_then(Value::as_f64).unwrap_or(default)
    }
}

pub fn timeouts_config(cfg: &Value) -> TimeoutsConfig {
    TimeoutsConfig {
        values: cfg.get_subsection("timeouts"),
    }
}
