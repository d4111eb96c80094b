//! Structured diagnostics: an append-only JSON-lines event log plus
//! colored human-mode rendering helpers, modeled on the teacher's
//! `broker.events.jsonl` audit trail.
//!
//! Every mutating operation in the Command Runner, Session Manager, and
//! Workflow layer calls [`emit_event`]. The log is advisory only — a
//! failure to write it never blocks the operation it describes.

use crate::core::atomic_io::LockParams;
use crate::core::time::now_rfc3339;
use crate::core::value::Value;
use colored::Colorize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Append one diagnostic event as a JSON line to
/// `<management_root>/edison.events.jsonl`. `fields` is merged into the
/// envelope `{ts, kind, ...fields}`.
pub fn emit_event(management_root: &Path, kind: &str, fields: Value) {
    let mut envelope = Value::map();
    envelope.set_path("ts", Value::String(now_rfc3339()));
    envelope.set_path("kind", Value::String(kind.to_string()));
    if let Value::Map(m) = fields {
        for (k, v) in m {
            envelope.set_path(&k, v);
        }
    }
    let line = match serde_json::to_string(&envelope.to_json_value()) {
        Ok(s) => s,
        Err(_) => return,
    };
    let log_path = management_root.join("edison.events.jsonl");
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _guard = crate::core::atomic_io::acquire_file_lock(&log_path, LockParams::default());
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&log_path) {
        let _ = writeln!(f, "{line}");
    }
}

pub fn success(msg: &str) -> String {
    format!("{} {}", "✓".green().bold(), msg)
}

pub fn warning(msg: &str) -> String {
    format!("{} {}", "!".yellow().bold(), msg.yellow())
}

pub fn error(msg: &str) -> String {
    format!("{} {}", "✗".red().bold(), msg.red())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn emit_event_appends_jsonl() {
        let dir = tempdir().unwrap();
        let mut fields = Value::map();
        fields.set_path("taskId", Value::String("150-wave1-demo".into()));
        emit_event(dir.path(), "task.claimed", fields);
        emit_event(dir.path(), "task.completed", Value::map());
        let text = std::fs::read_to_string(dir.path().join("edison.events.jsonl")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["kind"], "task.claimed");
        assert_eq!(first["taskId"], "150-wave1-demo");
    }
}
