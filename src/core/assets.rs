//! Embedded core layer: bundled config defaults, bundled packs, and the
//! `core` content layer (agents/validators/guidelines/constitutions/rules)
//! that the Composition Engine (`crate::composition`) and Rules Engine
//! (`crate::rules`) compose against.
//!
//! Everything under `assets/` at the crate root is baked into the binary
//! via `rust_embed`, so an Edison checkout never needs its defaults on
//! disk next to the executable.

use crate::core::value::Value;
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "assets/"]
struct CoreAssets;

/// Read an embedded file as UTF-8 text, e.g. `"config/defaults.yaml"` or
/// `"packs/node-api/config/pack.yaml"`.
pub fn read_embedded_string(path: &str) -> Option<String> {
    let file = CoreAssets::get(path)?;
    std::str::from_utf8(&file.data).ok().map(str::to_string)
}

/// Read and parse an embedded YAML file into a [`Value`]; `None` on any
/// missing file or parse failure (callers treat both as "absent").
pub fn read_embedded_yaml(path: &str) -> Option<Value> {
    Value::from_yaml_str(&read_embedded_string(path)?).ok()
}

/// List embedded paths under `prefix`, relative to `assets/`.
pub fn list_embedded(prefix: &str) -> Vec<String> {
    CoreAssets::iter()
        .filter(|p| p.starts_with(prefix))
        .map(|p| p.to_string())
        .collect()
}

pub fn embedded_exists(path: &str) -> bool {
    CoreAssets::get(path).is_some()
}
