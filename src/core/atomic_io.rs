//! Atomic text/JSON/YAML writes with fsync+rename, and advisory file locks.
//!
//! Every write in Edison funnels through [`atomic_write`]: a temp file is
//! created alongside the destination, written and fsynced while holding an
//! exclusive flock on a sidecar `<path>.lock`, then renamed over the target.
//! Readers take a shared lock on the same sidecar. Locks are NFS-safe
//! because they never lock the target file's own inode.

use crate::core::error::{EdisonError, Result};
use crate::core::value::Value;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Options for JSON serialization.
#[derive(Debug, Clone)]
pub struct JsonWriteOptions {
    pub indent: Option<usize>,
    pub sort_keys: bool,
}

impl Default for JsonWriteOptions {
    fn default() -> Self {
        Self {
            indent: Some(2),
            sort_keys: true,
        }
    }
}

/// Acquisition parameters for [`acquire_file_lock`], normally sourced from
/// `FileLockingConfig`.
#[derive(Debug, Clone, Copy)]
pub struct LockParams {
    pub timeout_seconds: f64,
    pub poll_interval_seconds: f64,
    pub fail_open: bool,
}

impl Default for LockParams {
    fn default() -> Self {
        Self {
            timeout_seconds: 10.0,
            poll_interval_seconds: 0.05,
            fail_open: false,
        }
    }
}

fn lock_sidecar(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".lock");
    path.with_file_name(name)
}

fn process_mutexes() -> &'static Mutex<rustc_hash::FxHashMap<PathBuf, &'static Mutex<()>>> {
    static MUTEXES: OnceLock<Mutex<rustc_hash::FxHashMap<PathBuf, &'static Mutex<()>>>> =
        OnceLock::new();
    MUTEXES.get_or_init(|| Mutex::new(rustc_hash::FxHashMap::default()))
}

fn thread_mutex_for(path: &Path) -> &'static Mutex<()> {
    let mut map = process_mutexes().lock().unwrap_or_else(|e| e.into_inner());
    if let Some(m) = map.get(path) {
        return m;
    }
    let leaked: &'static Mutex<()> = Box::leak(Box::new(Mutex::new(())));
    map.insert(path.to_path_buf(), leaked);
    leaked
}

/// A held advisory lock. The sidecar file is removed on drop when it was
/// created for this acquisition (`nfs_safe`), matching the Python
/// implementation's cleanup-on-exit behavior.
pub struct FileLockGuard {
    _thread_guard: Option<std::sync::MutexGuard<'static, ()>>,
    file: Option<File>,
    sidecar: PathBuf,
    held: bool,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Some(f) = self.file.take() {
            if self.held {
                let _ = FileExt::unlock(&f);
            }
        }
        if self.held {
            let _ = fs::remove_file(&self.sidecar);
        }
    }
}

impl FileLockGuard {
    pub fn is_held(&self) -> bool {
        self.held
    }
}

/// Acquire an exclusive advisory lock on `path` via a `.lock` sidecar,
/// serializing same-process threads with a per-path mutex first. Returns
/// `Err(LockTimeout)` on timeout unless `params.fail_open`, in which case
/// the guard is returned with `is_held() == false`.
pub fn acquire_file_lock(path: &Path, params: LockParams) -> Result<FileLockGuard> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let sidecar = lock_sidecar(path);
    let mutex = thread_mutex_for(&sidecar);

    let start = Instant::now();
    let timeout = Duration::from_secs_f64(params.timeout_seconds.max(0.0));
    let poll = Duration::from_secs_f64(params.poll_interval_seconds.max(0.001));

    let thread_guard = loop {
        match mutex.try_lock() {
            Ok(g) => break Some(g),
            Err(_) => {
                if start.elapsed() >= timeout {
                    if params.fail_open {
                        return Ok(FileLockGuard {
                            _thread_guard: None,
                            file: None,
                            sidecar,
                            held: false,
                        });
                    }
                    return Err(EdisonError::LockTimeout {
                        target: path.display().to_string(),
                        timeout_secs: params.timeout_seconds,
                    });
                }
                std::thread::sleep(poll);
            }
        }
    };

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&sidecar)?;

    loop {
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                return Ok(FileLockGuard {
                    _thread_guard: thread_guard,
                    file: Some(file),
                    sidecar,
                    held: true,
                });
            }
            Err(_) => {
                if start.elapsed() >= timeout {
                    if params.fail_open {
                        return Ok(FileLockGuard {
                            _thread_guard: thread_guard,
                            file: None,
                            sidecar,
                            held: false,
                        });
                    }
                    return Err(EdisonError::LockTimeout {
                        target: path.display().to_string(),
                        timeout_secs: params.timeout_seconds,
                    });
                }
                std::thread::sleep(poll);
            }
        }
    }
}

/// Acquire a shared (read) lock on `path`'s sidecar; used before reads.
pub fn acquire_shared_lock(path: &Path, params: LockParams) -> Result<FileLockGuard> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let sidecar = lock_sidecar(path);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&sidecar)?;

    let start = Instant::now();
    let timeout = Duration::from_secs_f64(params.timeout_seconds.max(0.0));
    let poll = Duration::from_secs_f64(params.poll_interval_seconds.max(0.001));
    loop {
        match FileExt::try_lock_shared(&file) {
            Ok(()) => {
                return Ok(FileLockGuard {
                    _thread_guard: None,
                    file: Some(file),
                    sidecar,
                    held: true,
                });
            }
            Err(_) => {
                if start.elapsed() >= timeout {
                    if params.fail_open {
                        return Ok(FileLockGuard {
                            _thread_guard: None,
                            file: None,
                            sidecar,
                            held: false,
                        });
                    }
                    return Err(EdisonError::LockTimeout {
                        target: path.display().to_string(),
                        timeout_secs: params.timeout_seconds,
                    });
                }
                std::thread::sleep(poll);
            }
        }
    }
}

/// Write `bytes` to `path` atomically: temp file in the same directory,
/// fsync, rename over target. Cleans up the temp file best-effort on error.
pub fn atomic_write(path: &Path, bytes: &[u8], params: LockParams) -> Result<()> {
    let parent = path.parent().ok_or_else(|| EdisonError::AtomicWriteFailed {
        path: path.display().to_string(),
        reason: "no parent directory".into(),
    })?;
    fs::create_dir_all(parent)?;

    let _lock = acquire_file_lock(path, params)?;

    let tmp_name = format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id()
    );
    let tmp_path = parent.join(tmp_name);

    let write_result = (|| -> Result<()> {
        let mut f = File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        Ok(())
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(EdisonError::AtomicWriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        });
    }

    if let Some(dir) = File::open(parent).ok() {
        let _ = dir.sync_all();
    }

    Ok(())
}

pub fn read_with_shared_lock(path: &Path, params: LockParams) -> Result<Vec<u8>> {
    let _lock = acquire_shared_lock(path, params)?;
    if !path.exists() {
        return Err(EdisonError::FileNotFound(path.display().to_string()));
    }
    Ok(fs::read(path)?)
}

pub fn write_json(
    path: &Path,
    value: &Value,
    opts: &JsonWriteOptions,
    lock_params: LockParams,
) -> Result<()> {
    let json = value.to_json_value();
    let text = if let Some(indent) = opts.indent {
        let mut buf = Vec::new();
        let indent_bytes = vec![b' '; indent];
        let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent_bytes);
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        serde::Serialize::serialize(&json, &mut ser)?;
        String::from_utf8(buf).map_err(|e| EdisonError::Internal(e.to_string()))?
    } else {
        serde_json::to_string(&json)?
    };
    let mut bytes = text.into_bytes();
    bytes.push(b'\n');
    atomic_write(path, &bytes, lock_params)
}

pub fn read_json(path: &Path, lock_params: LockParams) -> Result<Value> {
    let bytes = read_with_shared_lock(path, lock_params)?;
    let json: serde_json::Value = serde_json::from_slice(&bytes)?;
    Ok(Value::from_json_value(json))
}

/// YAML write with sorted keys and literal block scalars for multi-line
/// strings, matching the on-disk frontmatter/evidence format.
pub fn write_yaml(path: &Path, value: &Value, lock_params: LockParams) -> Result<()> {
    let text = to_sorted_yaml(value)?;
    atomic_write(path, text.as_bytes(), lock_params)
}

pub fn read_yaml(path: &Path, lock_params: LockParams) -> Result<Value> {
    let bytes = read_with_shared_lock(path, lock_params)?;
    let text = String::from_utf8_lossy(&bytes);
    Value::from_yaml_str(&text).map_err(EdisonError::from)
}

/// Render a `Value` as YAML with sorted map keys. `serde_yaml` itself does
/// not sort maps (we use an `FxHashMap`), so the sort happens via the
/// JSON round-trip's deterministic key ordering before re-parsing to yaml.
pub fn to_sorted_yaml(value: &Value) -> Result<String> {
    let json = value.to_json_value(); // sorts keys during conversion
    let yaml_value: serde_yaml::Value = serde_yaml::to_value(&json)?;
    Ok(serde_yaml::to_string(&yaml_value)?)
}
