//! Vendor Config & Mount Adapter: loads and validates `vendors.yaml`,
//! writes the deterministic `vendors.lock.yaml`, and mounts vendored
//! sources into the repo without ever writing outside it.
//!
//! Every vendor source is a `git` checkout the project does not own;
//! the validation here exists because `url`/`ref`/`path`/`sparse`
//! fields ultimately become `git` subprocess arguments, and an
//! attacker-controlled `vendors.yaml` (e.g. from a malicious PR) must
//! not be able to smuggle an option flag, escape the repo root, or
//! leak credentials into a committed lockfile.

use crate::core::atomic_io::{self, LockParams};
use crate::core::error::{EdisonError, Result};
use crate::core::git;
use crate::core::path;
use crate::core::value::Value;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorSource {
    pub name: String,
    pub url: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse: Option<Vec<String>>,
}

impl VendorSource {
    fn from_value(v: &Value) -> std::result::Result<Self, String> {
        let name = v
            .get_path("name")
            .and_then(Value::as_str)
            .ok_or("missing required field 'name'")?
            .to_string();
        let url = v
            .get_path("url")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("vendor '{name}' missing required field 'url'"))?
            .to_string();
        let git_ref = v
            .get_path("ref")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("vendor '{name}' missing required field 'ref'"))?
            .to_string();
        let checkout_path = v
            .get_path("path")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("vendor '{name}' missing required field 'path'"))?
            .to_string();
        let sparse = v.get_path("sparse").and_then(Value::as_list).map(|l| {
            l.iter()
                .filter_map(|e| e.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        });
        Ok(VendorSource {
            name,
            url,
            git_ref,
            path: checkout_path,
            sparse,
        })
    }
}

/// A value that, if passed verbatim as a `git` argument, could be
/// interpreted as an option rather than a positional value.
fn looks_like_option(s: &str) -> bool {
    s.starts_with('-')
}

/// `user@host` or `user@host:path` userinfo that isn't git's own
/// anonymous-over-ssh convention (`git@...`).
fn has_embedded_credentials(url: &str) -> bool {
    if let Some(scheme_split) = url.split_once("://") {
        return scheme_split.1.contains('@');
    }
    if let Some((userinfo, _rest)) = url.split_once('@') {
        return userinfo != "git" && url.contains(':');
    }
    false
}

fn validate_source(source: &VendorSource, repo_root: &Path) -> Result<()> {
    if looks_like_option(&source.url) || looks_like_option(&source.git_ref) {
        return Err(EdisonError::VendorOptionInjection(format!(
            "vendor '{}' has unsafe url/ref: {} / {}",
            source.name, source.url, source.git_ref
        )));
    }
    if has_embedded_credentials(&source.url) {
        return Err(EdisonError::VendorCredentialInUrl(format!(
            "vendor '{}' url contains embedded credentials",
            source.name
        )));
    }
    if let Some(sparse) = &source.sparse {
        if sparse.iter().any(|s| looks_like_option(s)) {
            return Err(EdisonError::VendorOptionInjection(format!(
                "vendor '{}' has unsafe sparse path entry",
                source.name
            )));
        }
    }

    let checkout = Path::new(&source.path);
    if checkout.is_absolute() {
        return Err(EdisonError::VendorPathEscapesRoot(format!(
            "vendor '{}' path must be relative: {}",
            source.name, source.path
        )));
    }
    let resolved = repo_root.join(checkout);
    let normalized = normalize(&resolved);
    if !normalized.starts_with(normalize(repo_root)) {
        return Err(EdisonError::VendorPathEscapesRoot(format!(
            "vendor '{}' path escapes repo root: {}",
            source.name, source.path
        )));
    }
    Ok(())
}

/// Lexical `..`/`.` normalization without touching the filesystem — the
/// target directory usually doesn't exist yet, so `canonicalize` is not
/// an option.
fn normalize(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in p.components() {
        use std::path::Component;
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Loaded, validated `vendors.yaml` for one project.
#[derive(Debug, Clone)]
pub struct VendorConfig {
    pub repo_root: PathBuf,
    raw: Value,
}

fn vendors_yaml_path(repo_root: &Path) -> PathBuf {
    path::project_config_dir(repo_root).join("vendors.yaml")
}

fn vendors_lock_path(repo_root: &Path) -> PathBuf {
    path::project_config_dir(repo_root).join("vendors.lock.yaml")
}

impl VendorConfig {
    pub fn load(repo_root: &Path) -> Result<Self> {
        let p = vendors_yaml_path(repo_root);
        let raw = match std::fs::read_to_string(&p) {
            Ok(text) => Value::from_yaml_str(&text)?,
            Err(_) => Value::map(),
        };
        Ok(VendorConfig {
            repo_root: repo_root.to_path_buf(),
            raw,
        })
    }

    /// Every configured vendor source, fully validated. An empty or
    /// absent `vendors.yaml` yields an empty list, not an error.
    pub fn sources(&self) -> Result<Vec<VendorSource>> {
        let Some(list) = self
            .raw
            .get_path("vendors.sources")
            .and_then(Value::as_list)
        else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for entry in list {
            let source = VendorSource::from_value(entry).map_err(EdisonError::ConfigSectionMissing)?;
            validate_source(&source, &self.repo_root)?;
            out.push(source);
        }
        Ok(out)
    }

    /// The configured cache directory, `~`-expanded, restricted to
    /// either inside the repo or under the user's home cache directory
    /// (`~/.cache/edison/...`) — anywhere else is refused so a
    /// compromised `vendors.yaml` can't point the cache at arbitrary
    /// filesystem locations.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let raw = self
            .raw
            .get_path("vendors.cacheDir")
            .and_then(Value::as_str)
            .unwrap_or(".edison/cache/vendors");
        let expanded = expand_home(raw);
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            self.repo_root.join(&expanded)
        };
        let normalized = normalize(&resolved);

        let inside_repo = normalized.starts_with(normalize(&self.repo_root));
        let inside_home_cache = std::env::var("HOME")
            .map(|home| normalized.starts_with(normalize(&Path::new(&home).join(".cache").join("edison"))))
            .unwrap_or(false);

        if !inside_repo && !inside_home_cache {
            return Err(EdisonError::VendorCacheDirDisallowed(
                normalized.display().to_string(),
            ));
        }
        Ok(normalized)
    }
}

/// A lock entry: the pinned state of one vendor source after a sync,
/// with credentials stripped from `url` before the entry is even
/// constructed, so no code path can accidentally persist a credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorLockEntry {
    pub name: String,
    pub url: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub commit: String,
    pub path: String,
}

/// Strip `user:pass@`/`user@` userinfo from a URL, keeping the rest
/// intact. Applied unconditionally so a lock entry can never retain a
/// credential regardless of how it was constructed.
fn strip_credentials(url: &str) -> String {
    if let Some((scheme, rest)) = url.split_once("://") {
        if let Some((_userinfo, host_and_path)) = rest.split_once('@') {
            return format!("{scheme}://{host_and_path}");
        }
        return url.to_string();
    }
    if let Some((userinfo, rest)) = url.split_once('@') {
        if userinfo != "git" && rest.contains(':') {
            return rest.to_string();
        }
    }
    url.to_string()
}

impl VendorLockEntry {
    pub fn new(name: &str, url: &str, git_ref: &str, commit: &str, path: &str) -> Self {
        VendorLockEntry {
            name: name.to_string(),
            url: strip_credentials(url),
            git_ref: git_ref.to_string(),
            commit: commit.to_string(),
            path: path.to_string(),
        }
    }

    fn from_value(v: &Value) -> Option<Self> {
        Some(VendorLockEntry {
            name: v.get_path("name").and_then(Value::as_str)?.to_string(),
            url: v.get_path("url").and_then(Value::as_str)?.to_string(),
            git_ref: v.get_path("ref").and_then(Value::as_str)?.to_string(),
            commit: v.get_path("commit").and_then(Value::as_str)?.to_string(),
            path: v.get_path("path").and_then(Value::as_str)?.to_string(),
        })
    }

    fn to_value(&self) -> Value {
        let mut m = Value::map();
        m.set_path("name", Value::String(self.name.clone()));
        m.set_path("url", Value::String(self.url.clone()));
        m.set_path("ref", Value::String(self.git_ref.clone()));
        m.set_path("commit", Value::String(self.commit.clone()));
        m.set_path("path", Value::String(self.path.clone()));
        m
    }
}

/// `vendors.lock.yaml`: a deterministic, sorted-by-name, credential-free
/// record of the resolved commit for every vendor source.
#[derive(Debug, Clone, Default)]
pub struct VendorLock {
    repo_root: PathBuf,
    entries: Vec<VendorLockEntry>,
}

impl VendorLock {
    pub fn new(repo_root: &Path) -> Self {
        VendorLock {
            repo_root: repo_root.to_path_buf(),
            entries: Vec::new(),
        }
    }

    pub fn load(repo_root: &Path) -> Result<Self> {
        let p = vendors_lock_path(repo_root);
        let entries = match std::fs::read_to_string(&p) {
            Ok(text) => {
                let v = Value::from_yaml_str(&text)?;
                v.get_path("vendors")
                    .and_then(Value::as_list)
                    .map(|l| l.iter().filter_map(VendorLockEntry::from_value).collect())
                    .unwrap_or_default()
            }
            Err(_) => Vec::new(),
        };
        Ok(VendorLock {
            repo_root: repo_root.to_path_buf(),
            entries,
        })
    }

    pub fn add_entry(&mut self, entry: VendorLockEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.name == entry.name) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    pub fn entries(&self) -> &[VendorLockEntry] {
        &self.entries
    }

    /// Write `vendors.lock.yaml`, sorted by vendor name for a
    /// deterministic diff.
    pub fn save(&self) -> Result<()> {
        let mut sorted = self.entries.clone();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let mut root = Value::map();
        root.set_path(
            "vendors",
            Value::List(sorted.iter().map(VendorLockEntry::to_value).collect()),
        );

        let p = vendors_lock_path(&self.repo_root);
        if let Some(parent) = p.parent() {
            std::fs::create_dir_all(parent)?;
        }
        atomic_io::write_yaml(&p, &root, LockParams::default())
    }
}

/// Resolve `source.git_ref` to a commit SHA by cloning/fetching into
/// `cache_dir` and reading `rev-parse`, without ever writing outside
/// `cache_dir`.
pub fn resolve_commit(source: &VendorSource, cache_dir: &Path, timeout: Duration) -> Result<String> {
    let checkout = cache_dir.join(&source.name);
    if !checkout.is_dir() {
        std::fs::create_dir_all(cache_dir)?;
        git::run_git_ok(
            cache_dir,
            &["clone", "--quiet", "--origin", "origin", &source.url, &source.name],
            timeout,
        )?;
    } else {
        git::run_git_ok(&checkout, &["fetch", "--quiet", "origin"], timeout)?;
    }
    git::run_git_ok(&checkout, &["checkout", "--quiet", &source.git_ref], timeout)?;
    let sha = git::run_git_ok(&checkout, &["rev-parse", "HEAD"], timeout)?;
    Ok(sha.trim().to_string())
}

/// Mount one resolved vendor source into the repo by copying its
/// (optionally sparse-filtered) checkout tree into `source.path`,
/// refusing to follow or create symlinks that would land outside the
/// destination.
pub fn mount(source: &VendorSource, cache_dir: &Path, repo_root: &Path) -> Result<PathBuf> {
    validate_source(source, repo_root)?;
    let checkout = cache_dir.join(&source.name);
    let dest = repo_root.join(&source.path);

    if dest.is_dir() {
        std::fs::remove_dir_all(&dest)?;
    }
    std::fs::create_dir_all(&dest)?;
    copy_tree(&checkout, &dest, source.sparse.as_deref())?;
    Ok(dest)
}

/// Copy `src` into `dest`, skipping `.git` and symlinks. `sparse`, when
/// set, restricts copied top-level entries to those whose name is a
/// prefix match against one of its entries (directories still recurse
/// fully once admitted, since `sparse` entries name directory prefixes
/// like `src/`, not individual files).
fn copy_tree(src: &Path, dest: &Path, sparse: Option<&[String]>) -> Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            continue;
        }
        if let Some(allow) = sparse {
            let rel = name.to_string_lossy().to_string();
            if !allow.iter().any(|a| a.trim_end_matches('/').starts_with(&rel) || rel.starts_with(a.trim_end_matches('/'))) {
                continue;
            }
        }
        let dest_path = dest.join(&name);
        if file_type.is_dir() {
            std::fs::create_dir_all(&dest_path)?;
            copy_tree(&path, &dest_path, None)?;
        } else {
            std::fs::copy(&path, &dest_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_yaml(dir: &Path, text: &str) {
        let cfg_dir = path::project_config_dir(dir);
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(cfg_dir.join("vendors.yaml"), text).unwrap();
    }

    #[test]
    fn loads_sources_from_project_config() {
        let dir = tempdir().unwrap();
        write_yaml(
            dir.path(),
            "vendors:\n  sources:\n    - name: opencode\n      url: https://github.com/example/opencode.git\n      ref: main\n      path: vendors/opencode\n",
        );
        let cfg = VendorConfig::load(dir.path()).unwrap();
        let sources = cfg.sources().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name, "opencode");
    }

    #[test]
    fn empty_when_no_vendors_yaml() {
        let dir = tempdir().unwrap();
        let cfg = VendorConfig::load(dir.path()).unwrap();
        assert!(cfg.sources().unwrap().is_empty());
    }

    #[test]
    fn rejects_absolute_checkout_path() {
        let dir = tempdir().unwrap();
        write_yaml(
            dir.path(),
            "vendors:\n  sources:\n    - name: x\n      url: https://e.com/x.git\n      ref: main\n      path: /tmp/evil\n",
        );
        let cfg = VendorConfig::load(dir.path()).unwrap();
        assert!(matches!(cfg.sources(), Err(EdisonError::VendorPathEscapesRoot(_))));
    }

    #[test]
    fn rejects_path_traversal() {
        let dir = tempdir().unwrap();
        write_yaml(
            dir.path(),
            "vendors:\n  sources:\n    - name: x\n      url: https://e.com/x.git\n      ref: main\n      path: ../evil\n",
        );
        let cfg = VendorConfig::load(dir.path()).unwrap();
        assert!(matches!(cfg.sources(), Err(EdisonError::VendorPathEscapesRoot(_))));
    }

    #[test]
    fn rejects_option_injection_in_url_and_ref() {
        let dir = tempdir().unwrap();
        write_yaml(
            dir.path(),
            "vendors:\n  sources:\n    - name: x\n      url: --upload-pack=sh\n      ref: --help\n      path: vendors/x\n",
        );
        let cfg = VendorConfig::load(dir.path()).unwrap();
        assert!(matches!(cfg.sources(), Err(EdisonError::VendorOptionInjection(_))));
    }

    #[test]
    fn rejects_embedded_credentials() {
        let dir = tempdir().unwrap();
        write_yaml(
            dir.path(),
            "vendors:\n  sources:\n    - name: x\n      url: https://token@github.com/e/x.git\n      ref: main\n      path: vendors/x\n",
        );
        let cfg = VendorConfig::load(dir.path()).unwrap();
        assert!(matches!(cfg.sources(), Err(EdisonError::VendorCredentialInUrl(_))));
    }

    #[test]
    fn rejects_scp_style_credential_urls() {
        let dir = tempdir().unwrap();
        write_yaml(
            dir.path(),
            "vendors:\n  sources:\n    - name: x\n      url: token@github.com:e/x.git\n      ref: main\n      path: vendors/x\n",
        );
        let cfg = VendorConfig::load(dir.path()).unwrap();
        assert!(matches!(cfg.sources(), Err(EdisonError::VendorCredentialInUrl(_))));
    }

    #[test]
    fn accepts_git_at_ssh_style_urls() {
        assert!(!has_embedded_credentials("git@github.com:example/repo.git"));
    }

    #[test]
    fn cache_dir_rejects_paths_outside_allowed_roots() {
        let dir = tempdir().unwrap();
        write_yaml(dir.path(), "vendors:\n  cacheDir: /tmp/edison-evil\n  sources: []\n");
        let cfg = VendorConfig::load(dir.path()).unwrap();
        assert!(matches!(cfg.cache_dir(), Err(EdisonError::VendorCacheDirDisallowed(_))));
    }

    #[test]
    fn cache_dir_inside_repo_is_allowed() {
        let dir = tempdir().unwrap();
        write_yaml(dir.path(), "vendors:\n  cacheDir: .edison/cache/vendors\n  sources: []\n");
        let cfg = VendorConfig::load(dir.path()).unwrap();
        assert!(cfg.cache_dir().is_ok());
    }

    #[test]
    fn lock_entry_strips_credentials_on_construction() {
        let entry = VendorLockEntry::new(
            "opencode",
            "https://token@github.com/example/opencode.git",
            "main",
            "abc123",
            "vendors/opencode",
        );
        assert!(!entry.url.contains("token@"));
        assert!(entry.url.contains("github.com/example/opencode.git"));
    }

    #[test]
    fn lock_file_is_sorted_by_name_and_round_trips() {
        let dir = tempdir().unwrap();
        let mut lock = VendorLock::new(dir.path());
        lock.add_entry(VendorLockEntry::new("zebra", "https://e.com/z.git", "main", "zzz", "vendors/zebra"));
        lock.add_entry(VendorLockEntry::new("alpha", "https://e.com/a.git", "main", "aaa", "vendors/alpha"));
        lock.save().unwrap();

        let loaded = VendorLock::load(dir.path()).unwrap();
        let names: Vec<&str> = loaded.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zebra"]);
    }

    #[test]
    fn lock_file_never_persists_credentials() {
        let dir = tempdir().unwrap();
        let mut lock = VendorLock::new(dir.path());
        lock.add_entry(VendorLockEntry::new(
            "opencode",
            "https://token@github.com/example/opencode.git",
            "main",
            "abc123",
            "vendors/opencode",
        ));
        lock.save().unwrap();

        let text = std::fs::read_to_string(vendors_lock_path(dir.path())).unwrap();
        assert!(!text.contains("token@"));
    }

    #[test]
    fn mount_copies_checkout_tree_and_skips_dot_git() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("cache");
        let checkout = cache.join("demo");
        std::fs::create_dir_all(checkout.join(".git")).unwrap();
        std::fs::write(checkout.join("README.md"), "hi").unwrap();

        let source = VendorSource {
            name: "demo".into(),
            url: "https://e.com/demo.git".into(),
            git_ref: "main".into(),
            path: "vendors/demo".into(),
            sparse: None,
        };
        let dest = mount(&source, &cache, dir.path()).unwrap();
        assert!(dest.join("README.md").is_file());
        assert!(!dest.join(".git").exists());
    }
}
