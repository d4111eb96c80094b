//! Evidence Service: round directories, command-evidence v1 format,
//! snapshot fingerprinting, and reuse-on-identical-fingerprint.
//!
//! Directory layout per task:
//! `<qa-root>/validation-evidence/<task-id>/round-N/command-*.txt`, plus
//! `<qa-root>/validation-evidence/<task-id>/snapshots/<fingerprint-key>/`
//! holding a reuse cache keyed by the repo fingerprint.

use crate::core::atomic_io::{self, LockParams};
use crate::core::config;
use crate::core::error::{EdisonError, Result};
use crate::core::git;
use crate::core::path;
use crate::core::time::now_rfc3339;
use crate::core::value::Value;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// `{gitHead, gitDirty, diffHash}` per spec.md §3 "Evidence snapshot key".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFingerprint {
    pub git_head: String,
    pub git_dirty: bool,
    pub diff_hash: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn sorted_joined(paths: &[String]) -> String {
    let mut sorted = paths.to_vec();
    sorted.sort();
    sorted.join("\n")
}

/// Compute the repo fingerprint for `repo_root`. A non-git directory
/// yields the fixed fingerprint `{"", false, sha256("")}`.
pub fn compute_repo_fingerprint(repo_root: &Path, timeout: Duration) -> RepoFingerprint {
    if !repo_root.join(".git").exists() && !git::is_inside_work_tree(repo_root, timeout) {
        return RepoFingerprint {
            git_head: String::new(),
            git_dirty: false,
            diff_hash: sha256_hex(b""),
        };
    }

    let head = git::run_git(repo_root, &["rev-parse", "HEAD"], timeout)
        .map(|o| o.stdout.trim().to_string())
        .unwrap_or_default();

    let diff = git::run_git(repo_root, &["diff", "--no-ext-diff"], timeout)
        .map(|o| o.stdout)
        .unwrap_or_default();
    let diff_cached = git::run_git(repo_root, &["diff", "--cached", "--no-ext-diff"], timeout)
        .map(|o| o.stdout)
        .unwrap_or_default();

    let status = git::run_git(repo_root, &["status", "--porcelain"], timeout)
        .map(|o| o.stdout)
        .unwrap_or_default();

    let mut staged = Vec::new();
    let mut modified = Vec::new();
    let mut untracked = Vec::new();
    for line in status.lines() {
        if line.len() < 4 {
            continue;
        }
        let index_status = line.as_bytes()[0] as char;
        let worktree_status = line.as_bytes()[1] as char;
        let file = line[3..].to_string();
        if worktree_status == '?' && index_status == '?' {
            untracked.push(file);
        } else {
            if index_status != ' ' && index_status != '?' {
                staged.push(file.clone());
            }
            if worktree_status != ' ' && worktree_status != '?' {
                modified.push(file);
            }
        }
    }

    let dirty = !staged.is_empty() || !modified.is_empty() || !untracked.is_empty();

    let payload = [
        head.as_str(),
        diff.as_str(),
        diff_cached.as_str(),
        sorted_joined(&staged).as_str(),
        sorted_joined(&modified).as_str(),
        sorted_joined(&untracked).as_str(),
    ]
    .join("\n");
    let diff_hash = sha256_hex(payload.as_bytes());

    RepoFingerprint {
        git_head: head,
        git_dirty: dirty,
        diff_hash,
    }
}

/// The opaque snapshot key: the full hex `diffHash`, used directly as a
/// directory name. No truncation.
pub fn snapshot_key(fp: &RepoFingerprint) -> String {
    fp.diff_hash.clone()
}

pub fn current_snapshot_key(repo_root: &Path, timeout: Duration) -> String {
    snapshot_key(&compute_repo_fingerprint(repo_root, timeout))
}

fn snapshots_root(project_root: &Path, task_id: &str) -> PathBuf {
    path::evidence_root(project_root, task_id).join("snapshots")
}

pub fn snapshot_dir(project_root: &Path, task_id: &str, key: &str) -> PathBuf {
    snapshots_root(project_root, task_id).join(key)
}

/// Round directories are 1-indexed; `0` means none exist yet.
pub fn current_round(project_root: &Path, task_id: &str) -> u32 {
    let root = path::evidence_root(project_root, task_id);
    let Ok(entries) = fs::read_dir(&root) else {
        return 0;
    };
    entries
        .flatten()
        .filter_map(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.strip_prefix("round-").and_then(|n| n.parse::<u32>().ok())
        })
        .max()
        .unwrap_or(0)
}

pub fn round_dir(project_root: &Path, task_id: &str, round: u32) -> PathBuf {
    path::evidence_root(project_root, task_id).join(format!("round-{round}"))
}

/// Command-evidence v1, parsed or pre-write.
#[derive(Debug, Clone)]
pub struct CommandEvidenceV1 {
    pub task_id: String,
    pub round: u32,
    pub command_name: String,
    pub command: String,
    pub cwd: String,
    pub shell: String,
    pub pipefail: bool,
    pub started_at: String,
    pub completed_at: String,
    pub exit_code: i32,
    pub fingerprint: Option<String>,
    pub runner: Option<String>,
    pub hmac: Option<String>,
    pub output: String,
}

fn frontmatter_value(ev: &CommandEvidenceV1) -> Value {
    let mut m = Value::map();
    m.set_path("evidenceVersion", Value::Int(1));
    m.set_path("evidenceKind", Value::String("command".into()));
    m.set_path("taskId", Value::String(ev.task_id.clone()));
    m.set_path("round", Value::Int(ev.round as i64));
    m.set_path("commandName", Value::String(ev.command_name.clone()));
    m.set_path("command", Value::String(ev.command.clone()));
    m.set_path("cwd", Value::String(ev.cwd.clone()));
    m.set_path("shell", Value::String(ev.shell.clone()));
    m.set_path("pipefail", Value::Bool(ev.pipefail));
    m.set_path("startedAt", Value::String(ev.started_at.clone()));
    m.set_path("completedAt", Value::String(ev.completed_at.clone()));
    m.set_path("exitCode", Value::Int(ev.exit_code as i64));
    if let Some(f) = &ev.fingerprint {
        m.set_path("fingerprint", Value::String(f.clone()));
    }
    if let Some(r) = &ev.runner {
        m.set_path("runner", Value::String(r.clone()));
    }
    if let Some(h) = &ev.hmac {
        m.set_path("hmac", Value::String(h.clone()));
    }
    m
}

type HmacSha256 = Hmac<Sha256>;

/// Render v1 evidence to its byte-for-byte on-disk form: sorted
/// frontmatter keys, a blank line, the verbatim body, one trailing
/// newline. `hmac_key` signs the frontmatter+body bytes (sans the `hmac`
/// field itself) when present.
pub fn render_command_evidence(ev: &CommandEvidenceV1, hmac_key: Option<&[u8]>) -> Result<String> {
    let mut ev = ev.clone();
    ev.hmac = None;
    let frontmatter = frontmatter_value(&ev);
    let yaml = atomic_io::to_sorted_yaml(&frontmatter)?;

    if let Some(key) = hmac_key {
        let mut to_sign = String::from("---\n");
        to_sign.push_str(yaml.trim_end());
        to_sign.push_str("\n---\n\n");
        to_sign.push_str(ev.output.trim_end());
        to_sign.push('\n');
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|e| EdisonError::Internal(format!("invalid hmac key: {e}")))?;
        mac.update(to_sign.as_bytes());
        ev.hmac = Some(format!("{:x}", mac.finalize().into_bytes()));
    }

    let frontmatter = frontmatter_value(&ev);
    let yaml = atomic_io::to_sorted_yaml(&frontmatter)?;
    let mut out = String::from("---\n");
    out.push_str(yaml.trim_end());
    out.push_str("\n---\n\n");
    out.push_str(ev.output.trim_end());
    out.push('\n');
    Ok(out)
}

/// Parse a command-evidence v1 file into its frontmatter map (plus
/// `"output"`) or `None` if the document is not a well-formed
/// frontmatter document at all.
pub fn parse_command_evidence(path: &Path) -> Option<BTreeMap<String, Value>> {
    let text = fs::read_to_string(path).ok()?;
    let (frontmatter, body) = crate::entity::parse_frontmatter_document(&text).ok()?;
    let mut map: BTreeMap<String, Value> = frontmatter
        .as_map()?
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    map.insert("output".to_string(), Value::String(body));
    Some(map)
}

/// Validate a parsed evidence map: required keys present & well-typed,
/// and `exitCode == 0`. Returns `(ok, error_message)`.
pub fn validate_command_evidence(parsed: &BTreeMap<String, Value>) -> (bool, Option<String>) {
    let required_str = ["evidenceKind", "taskId", "commandName", "command", "cwd", "shell"];
    for key in required_str {
        match parsed.get(key) {
            Some(Value::String(_)) => {}
            Some(_) => return (false, Some(format!("key '{key}' has the wrong type"))),
            None => return (false, Some(format!("missing required key '{key}'"))),
        }
    }
    match parsed.get("evidenceVersion") {
        Some(Value::Int(1)) => {}
        Some(_) => return (false, Some("evidenceVersion must be integer 1".into())),
        None => return (false, Some("missing required key 'evidenceVersion'".into())),
    }
    match parsed.get("evidenceKind").and_then(Value::as_str) {
        Some("command") => {}
        _ => return (false, Some("evidenceKind must be 'command'".into())),
    }
    match parsed.get("round") {
        Some(Value::Int(_)) => {}
        Some(_) => return (false, Some("round must be an integer".into())),
        None => return (false, Some("missing required key 'round'".into())),
    }
    match parsed.get("pipefail") {
        Some(Value::Bool(_)) => {}
        Some(_) => return (false, Some("pipefail must be a bool".into())),
        None => return (false, Some("missing required key 'pipefail'".into())),
    }
    for key in ["startedAt", "completedAt"] {
        match parsed.get(key) {
            Some(Value::String(s)) if crate::core::time::parse_rfc3339(s).is_some() => {}
            Some(_) => return (false, Some(format!("key '{key}' is not a valid timestamp"))),
            None => return (false, Some(format!("missing required key '{key}'"))),
        }
    }
    match parsed.get("exitCode") {
        Some(Value::Int(0)) => {}
        Some(Value::Int(code)) => {
            return (
                false,
                Some(format!("command exited with non-zero code {code}")),
            )
        }
        Some(_) => return (false, Some("exitCode must be an integer".into())),
        None => return (false, Some("missing required key 'exitCode'".into())),
    }
    (true, None)
}

/// Check every `required_names` file under `round_dir`: missing file,
/// missing/unterminated frontmatter, and schema errors all collected
/// into one error-string list (empty when every file is valid+passing).
pub fn validate_command_evidence_files(round_dir: &Path, required_names: &[String]) -> Vec<String> {
    let mut errors = Vec::new();
    for name in required_names {
        let path = round_dir.join(name);
        if !path.is_file() {
            errors.push(format!("{name}: missing file"));
            continue;
        }
        let Some(parsed) = parse_command_evidence(&path) else {
            errors.push(format!("{name}: missing frontmatter"));
            continue;
        };
        let (ok, message) = validate_command_evidence(&parsed);
        if !ok {
            errors.push(format!("{name}: {}", message.unwrap_or_default()));
        }
    }
    errors
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotStatus {
    pub complete: bool,
    pub passed: bool,
    pub valid: bool,
}

impl SnapshotStatus {
    pub fn complete_and_passing(&self) -> bool {
        self.complete && self.passed && self.valid
    }
}

/// `complete` iff every required file exists; `passed` iff each has
/// `exitCode == 0`; `valid` iff each passes full schema validation.
/// `valid` implies `passed` by construction of
/// [`validate_command_evidence`], so `passed` is reported identically to
/// `valid` here — kept distinct in the type to mirror the spec's
/// three-part status and allow future divergence (e.g. a looser
/// "ran, maybe failed" passed check).
pub fn snapshot_status(dir: &Path, required_files: &[String]) -> SnapshotStatus {
    if required_files.is_empty() {
        return SnapshotStatus {
            complete: true,
            passed: true,
            valid: true,
        };
    }
    let complete = required_files.iter().all(|f| dir.join(f).is_file());
    if !complete {
        return SnapshotStatus {
            complete: false,
            passed: false,
            valid: false,
        };
    }
    let errors = validate_command_evidence_files(dir, required_files);
    let valid = errors.is_empty();
    SnapshotStatus {
        complete: true,
        passed: valid,
        valid,
    }
}

/// Translate logical command names (`"test"`, `"lint"`, ...) configured
/// under `validation.evidence.files` into their on-disk evidence file
/// names (`"command-test.txt"`, ...), falling back to
/// `command-<name>.txt` when no explicit mapping exists.
pub fn evidence_file_name(cfg: &Value, logical_name: &str) -> String {
    config::section(cfg, "validation")
        .get_subsection("evidence")
        .get_subsection("files")
        .get_path(logical_name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("command-{logical_name}.txt"))
}

/// Render a configured command-template string, substituting `{{var}}`
/// placeholders from a flat context (task frontmatter keys, plus
/// `task_id`, `components_csv`, `component`). Hyphenated frontmatter
/// keys are also exposed with underscores, matching the evidence
/// templating contract in spec.md §9.
pub fn render_command_template(template: &str, context: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let name = after[..end].trim();
        if let Some(value) = context.get(name) {
            out.push_str(value);
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

pub fn flatten_template_context(task: &crate::entity::Task) -> BTreeMap<String, String> {
    let mut ctx = BTreeMap::new();
    ctx.insert("task_id".to_string(), task.id.clone());
    ctx.insert("components_csv".to_string(), String::new());
    ctx.insert("component".to_string(), String::new());
    let frontmatter = task.to_frontmatter_value();
    if let Some(map) = frontmatter.as_map() {
        for (k, v) in map {
            if let Some(s) = v.as_str() {
                ctx.insert(k.clone(), s.to_string());
                ctx.insert(k.replace('-', "_"), s.to_string());
            }
        }
    }
    ctx
}

/// Lock key for a command group's evidence-capture lock, consistent with
/// the Command Runner's own `{evidence_capture, command_group}` pairing.
pub fn evidence_lock_path(project_root: &Path, task_id: &str, command_group: &str) -> PathBuf {
    path::evidence_root(project_root, task_id)
        .join(".locks")
        .join(format!("{command_group}.lock"))
}

/// Write one command's captured output as v1 evidence into `round_dir`.
pub fn write_command_evidence(
    round_dir: &Path,
    file_name: &str,
    ev: &CommandEvidenceV1,
    hmac_key: Option<&[u8]>,
) -> Result<PathBuf> {
    let text = render_command_evidence(ev, hmac_key)?;
    let path = round_dir.join(file_name);
    atomic_io::atomic_write(&path, text.as_bytes(), LockParams::default())?;
    Ok(path)
}

pub fn new_evidence(
    task_id: &str,
    round: u32,
    command_name: &str,
    command: &str,
    cwd: &str,
    exit_code: i32,
    started_at: String,
    output: String,
) -> CommandEvidenceV1 {
    CommandEvidenceV1 {
        task_id: task_id.to_string(),
        round,
        command_name: command_name.to_string(),
        command: command.to_string(),
        cwd: cwd.to_string(),
        shell: "bash".to_string(),
        pipefail: true,
        started_at,
        completed_at: now_rfc3339(),
        exit_code,
        fingerprint: None,
        runner: None,
        hmac: None,
        output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn init_repo(dir: &Path) {
        git::run_git_ok(dir, &["init", "--quiet"], Duration::from_secs(5)).unwrap();
        git::run_git_ok(dir, &["config", "user.email", "a@b.c"], Duration::from_secs(5)).unwrap();
        git::run_git_ok(dir, &["config", "user.name", "t"], Duration::from_secs(5)).unwrap();
        fs::write(dir.join("README.md"), "hello").unwrap();
        git::run_git_ok(dir, &["add", "."], Duration::from_secs(5)).unwrap();
        git::run_git_ok(dir, &["commit", "-m", "init"], Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn non_git_dir_yields_fixed_fingerprint() {
        let dir = tempdir().unwrap();
        let fp = compute_repo_fingerprint(dir.path(), Duration::from_secs(5));
        assert_eq!(fp.git_head, "");
        assert!(!fp.git_dirty);
        assert_eq!(fp.diff_hash, sha256_hex(b""));
    }

    #[test]
    fn clean_repo_is_not_dirty_and_fingerprint_is_stable() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let a = compute_repo_fingerprint(dir.path(), Duration::from_secs(5));
        let b = compute_repo_fingerprint(dir.path(), Duration::from_secs(5));
        assert!(!a.git_dirty);
        assert_eq!(a, b);
    }

    #[test]
    fn dirty_worktree_changes_the_fingerprint() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let clean = compute_repo_fingerprint(dir.path(), Duration::from_secs(5));
        fs::write(dir.path().join("README.md"), "changed").unwrap();
        let dirty = compute_repo_fingerprint(dir.path(), Duration::from_secs(5));
        assert!(dirty.git_dirty);
        assert_ne!(clean.diff_hash, dirty.diff_hash);
    }

    #[test]
    fn evidence_round_trips_byte_for_byte() {
        let ev = new_evidence(
            "150-wave1-demo",
            1,
            "test",
            "cargo test",
            "/repo",
            0,
            "2026-01-01T00:00:00.000000Z".to_string(),
            "all tests passed\n".to_string(),
        );
        let rendered = render_command_evidence(&ev, None).unwrap();
        assert!(rendered.ends_with('\n'));
        assert!(!rendered.ends_with("\n\n"));

        let dir = tempdir().unwrap();
        let path = dir.path().join("command-test.txt");
        fs::write(&path, &rendered).unwrap();
        let parsed = parse_command_evidence(&path).unwrap();
        assert_eq!(parsed["taskId"].as_str(), Some("150-wave1-demo"));
        assert_eq!(parsed["exitCode"].as_i64(), Some(0));
        assert_eq!(parsed["output"].as_str(), Some("all tests passed"));
        let (ok, _) = validate_command_evidence(&parsed);
        assert!(ok);
    }

    #[test]
    fn hmac_signing_is_deterministic_and_verifiable() {
        let ev = new_evidence(
            "150",
            1,
            "test",
            "cargo test",
            "/repo",
            0,
            "2026-01-01T00:00:00.000000Z".to_string(),
            "ok".to_string(),
        );
        let a = render_command_evidence(&ev, Some(b"secret")).unwrap();
        let b = render_command_evidence(&ev, Some(b"secret")).unwrap();
        assert_eq!(a, b);
        let no_key = render_command_evidence(&ev, None).unwrap();
        assert!(!no_key.contains("hmac:"));
        assert!(a.contains("hmac:"));
    }

    #[test]
    fn non_zero_exit_fails_validation() {
        let ev = new_evidence(
            "150",
            1,
            "test",
            "cargo test",
            "/repo",
            1,
            "2026-01-01T00:00:00.000000Z".to_string(),
            "failure".to_string(),
        );
        let rendered = render_command_evidence(&ev, None).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("command-test.txt");
        fs::write(&path, &rendered).unwrap();
        let parsed = parse_command_evidence(&path).unwrap();
        let (ok, msg) = validate_command_evidence(&parsed);
        assert!(!ok);
        assert!(msg.unwrap().contains("non-zero"));
    }

    #[test]
    fn snapshot_status_reports_missing_file_as_incomplete() {
        let dir = tempdir().unwrap();
        let status = snapshot_status(dir.path(), &["command-test.txt".to_string()]);
        assert!(!status.complete);
        assert!(!status.complete_and_passing());
    }

    #[test]
    fn snapshot_status_empty_requirements_is_trivially_complete() {
        let dir = tempdir().unwrap();
        let status = snapshot_status(dir.path(), &[]);
        assert!(status.complete_and_passing());
    }

    #[test]
    fn render_command_template_substitutes_known_vars() {
        let mut ctx = BTreeMap::new();
        ctx.insert("task_id".to_string(), "150-wave1-demo".to_string());
        let out = render_command_template("pytest tests/{{task_id}}", &ctx);
        assert_eq!(out, "pytest tests/150-wave1-demo");
    }

    #[test]
    fn evidence_file_name_falls_back_to_command_prefix_convention() {
        let cfg = Value::map();
        assert_eq!(evidence_file_name(&cfg, "custom"), "command-custom.txt");
    }
}
