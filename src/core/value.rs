//! Dynamic configuration value tree.
//!
//! Config, frontmatter, and evidence payloads all start life as dict-of-dict
//! data. Rather than threading `serde_json::Value` (JSON-shaped) through
//! code that is fundamentally YAML, `Value` gives deep-merge and
//! tolerant-getter semantics a single, documented home.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(FxHashMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(_) | Value::Map(_) => {
                write!(f, "{}", serde_json::to_string(self).unwrap_or_default())
            }
        }
    }
}

impl Value {
    pub fn map() -> Self {
        Value::Map(FxHashMap::default())
    }

    pub fn as_map(&self) -> Option<&FxHashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut FxHashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Tolerant getter: always returns an (empty on miss) map, never panics.
    /// Mirrors the Python config layer's `get_subsection(name) -> dict`.
    pub fn get_subsection(&self, name: &str) -> Value {
        match self {
            Value::Map(m) => m.get(name).cloned().unwrap_or_else(Value::map),
            _ => Value::map(),
        }
    }

    /// Dotted-path lookup, e.g. `get_path("session.worktree.timeouts")`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut cur = self;
        for part in path.split('.') {
            cur = cur.as_map()?.get(part)?;
        }
        Some(cur)
    }

    /// Tolerant string-list getter: `get_path(path)` as a `Vec<String>`,
    /// dropping any non-string entries, empty on miss.
    pub fn string_list(&self, path: &str) -> Vec<String> {
        self.get_path(path)
            .and_then(Value::as_list)
            .map(|l| l.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    pub fn set_path(&mut self, path: &str, value: Value) {
        let parts: Vec<&str> = path.split('.').collect();
        let mut cur = self;
        for (i, part) in parts.iter().enumerate() {
            if i == parts.len() - 1 {
                if let Value::Map(m) = cur {
                    m.insert(part.to_string(), value);
                }
                return;
            }
            if !matches!(cur, Value::Map(_)) {
                *cur = Value::map();
            }
            let m = cur.as_map_mut().unwrap();
            cur = m.entry(part.to_string()).or_insert_with(Value::map);
        }
    }

    /// Deep-merge `other` on top of `self`: maps merge recursively, lists
    /// and scalars replace. Returns the merged value; does not mutate.
    pub fn deep_merge(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Map(base), Value::Map(overlay)) => {
                let mut merged = base.clone();
                for (k, v) in overlay {
                    match merged.get(k) {
                        Some(existing) => {
                            merged.insert(k.clone(), existing.deep_merge(v));
                        }
                        None => {
                            merged.insert(k.clone(), v.clone());
                        }
                    }
                }
                Value::Map(merged)
            }
            _ => other.clone(),
        }
    }

    pub fn merge_all<'a>(values: impl IntoIterator<Item = &'a Value>) -> Value {
        values
            .into_iter()
            .fold(Value::map(), |acc, v| acc.deep_merge(v))
    }

    pub fn from_yaml_str(s: &str) -> Result<Value, serde_yaml::Error> {
        if s.trim().is_empty() {
            return Ok(Value::map());
        }
        serde_yaml::from_str(s)
    }

    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn from_json_value(v: serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => {
                Value::List(a.into_iter().map(Value::from_json_value).collect())
            }
            serde_json::Value::Object(o) => Value::Map(
                o.into_iter()
                    .map(|(k, v)| (k, Value::from_json_value(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::json!(f),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(l) => serde_json::Value::Array(l.iter().map(Value::to_json_value).collect()),
            Value::Map(m) => {
                let mut obj = serde_json::Map::new();
                let mut keys: Vec<&String> = m.keys().collect();
                keys.sort();
                for k in keys {
                    obj.insert(k.clone(), m[k].to_json_value());
                }
                serde_json::Value::Object(obj)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(pairs: &[(&str, Value)]) -> Value {
        let mut m = FxHashMap::default();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        Value::Map(m)
    }

    #[test]
    fn deep_merge_recurses_into_maps() {
        let base = map_of(&[
            ("a", Value::Int(1)),
            (
                "nested",
                map_of(&[("x", Value::Int(1)), ("y", Value::Int(2))]),
            ),
        ]);
        let overlay = map_of(&[("nested", map_of(&[("y", Value::Int(99))]))]);
        let merged = base.deep_merge(&overlay);
        assert_eq!(merged.get_path("a").unwrap().as_i64(), Some(1));
        assert_eq!(merged.get_path("nested.x").unwrap().as_i64(), Some(1));
        assert_eq!(merged.get_path("nested.y").unwrap().as_i64(), Some(99));
    }

    #[test]
    fn deep_merge_replaces_lists_and_scalars() {
        let base = map_of(&[("list", Value::List(vec![Value::Int(1), Value::Int(2)]))]);
        let overlay = map_of(&[("list", Value::List(vec![Value::Int(9)]))]);
        let merged = base.deep_merge(&overlay);
        assert_eq!(merged.get_path("list").unwrap().as_list().unwrap().len(), 1);
    }

    #[test]
    fn get_subsection_never_panics_on_missing() {
        let v = Value::map();
        let sub = v.get_subsection("missing");
        assert!(sub.as_map().unwrap().is_empty());
    }

    #[test]
    fn yaml_round_trip() {
        let yaml = "a: 1\nnested:\n  x: true\n  y: hello\n";
        let v = Value::from_yaml_str(yaml).unwrap();
        assert_eq!(v.get_path("a").unwrap().as_i64(), Some(1));
        assert_eq!(v.get_path("nested.x").unwrap().as_bool(), Some(true));
        assert_eq!(v.get_path("nested.y").unwrap().as_str(), Some("hello"));
    }

    #[test]
    fn set_path_creates_intermediate_maps() {
        let mut v = Value::map();
        v.set_path("a.b.c", Value::Int(5));
        assert_eq!(v.get_path("a.b.c").unwrap().as_i64(), Some(5));
    }
}
