//! Command Runner: executes a shell command the way the evidence
//! service expects it recorded, under a per-`{command_group, session}`
//! advisory lock so two agents never race the same CI command.
//!
//! Every command runs as `bash -o pipefail -c "<command>"` with stdout
//! and stderr combined into one stream, mirroring what a human would see
//! in a terminal and what the evidence format's `body` field captures
//! verbatim.

use crate::core::atomic_io::{self, LockParams};
use crate::core::error::Result;
use crate::core::time::now_rfc3339;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub command: String,
    pub cwd: String,
    pub shell: &'static str,
    pub pipefail: bool,
    pub started_at: String,
    pub completed_at: String,
    pub exit_code: i32,
    pub output: String,
    pub lock_key: String,
    pub lock_path: PathBuf,
    pub waited_ms: u64,
}

/// Lock key for a `{command_group, session_id}` pair: `sha256` of the two
/// joined by a newline, truncated to 16 hex chars. Short enough to be a
/// filesystem-friendly lock file name while still effectively unique for
/// any realistic number of concurrent command groups.
pub fn lock_key(command_group: &str, session_id: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(command_group.as_bytes());
    hasher.update(b"\n");
    hasher.update(session_id.unwrap_or("").as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

pub fn lock_path(evidence_root: &Path, command_group: &str, session_id: Option<&str>) -> PathBuf {
    evidence_root
        .join(".locks")
        .join(format!("{}.lock", lock_key(command_group, session_id)))
}

/// Run `command` under `cwd`, holding an advisory lock on
/// `lock_path(evidence_root, command_group, session_id)` for the
/// duration of the subprocess. Never returns `Err` on a non-zero command
/// exit — the caller (evidence capture) decides what a failing command
/// means; only lock/process-spawn failures are `Err`.
pub fn run_locked(
    evidence_root: &Path,
    command_group: &str,
    session_id: Option<&str>,
    command: &str,
    cwd: &Path,
    timeout: Duration,
    lock_params: LockParams,
) -> Result<CommandResult> {
    let key = lock_key(command_group, session_id);
    let path = lock_path(evidence_root, command_group, session_id);

    let wait_start = Instant::now();
    let _guard = atomic_io::acquire_file_lock(&path, lock_params)?;
    let waited_ms = wait_start.elapsed().as_millis() as u64;

    let started_at = now_rfc3339();
    let (exit_code, output) = run_bash_pipefail(command, cwd, timeout)?;
    let completed_at = now_rfc3339();

    Ok(CommandResult {
        command: command.to_string(),
        cwd: cwd.display().to_string(),
        shell: "bash",
        pipefail: true,
        started_at,
        completed_at,
        exit_code,
        output,
        lock_key: key,
        lock_path: path,
        waited_ms,
    })
}

fn run_bash_pipefail(command: &str, cwd: &Path, timeout: Duration) -> Result<(i32, String)> {
    use crate::core::error::EdisonError;

    let mut child = Command::new("bash")
        .arg("-o")
        .arg("pipefail")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| EdisonError::Internal(format!("failed to spawn command: {e}")))?;

    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let (tx, rx) = std::sync::mpsc::channel();
    let reader = std::thread::spawn(move || {
        let mut out = String::new();
        let mut err = String::new();
        if let Some(mut s) = stdout_handle {
            let _ = s.read_to_string(&mut out);
        }
        if let Some(mut s) = stderr_handle {
            let _ = s.read_to_string(&mut err);
        }
        let _ = tx.send((out, err));
    });

    let start = Instant::now();
    let poll = Duration::from_millis(25);
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| EdisonError::Internal(e.to_string()))?
        {
            break status;
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EdisonError::Internal(format!(
                "command timed out after {}s",
                timeout.as_secs_f64()
            )));
        }
        std::thread::sleep(poll);
    };

    let (stdout, stderr) = rx.recv_timeout(Duration::from_secs(5)).unwrap_or_default();
    let _ = reader.join();

    // Combined stdout+stderr, in that order, matching how a pipefail shell
    // interleaves them when both streams are inherited by a single pty;
    // here they're captured separately so order within each is exact but
    // interleaving across streams is not preserved.
    let mut output = stdout;
    output.push_str(&stderr);

    Ok((status.code().unwrap_or(-1), output))
}
