//! Shared git subprocess helper.
//!
//! Every git invocation in the Session & Worktree Manager, the Evidence
//! Service's fingerprinting, and the Vendor Adapter goes through
//! [`run_git`] so that timeouts are uniformly enforced and never
//! hardcoded at the call site. Timeouts come from `TimeoutsConfig`
//! (`session.worktree.timeouts.*`); hardcoding a constant in this module
//! would violate the component's own contract.

use crate::core::error::{EdisonError, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GitOutput {
    pub status_ok: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run `git <args>` with `cwd` as the working directory, killing the
/// child and returning `GitTimeout` if it outlives `timeout`.
pub fn run_git(cwd: &Path, args: &[&str], timeout: Duration) -> Result<GitOutput> {
    let mut child = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| EdisonError::GitCommandFailed(format!("spawn git {args:?}: {e}")))?;

    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let (tx, rx) = mpsc::channel();

    let reader = thread::spawn(move || {
        use std::io::Read;
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

    let start = std::time::Instant::now();
    let poll = Duration::from_millis(25);
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| EdisonError::GitCommandFailed(e.to_string()))?
        {
            break status;
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EdisonError::GitTimeout(timeout.as_secs_f64()));
        }
        thread::sleep(poll);
    };

    let (stdout, stderr) = rx.recv_timeout(Duration::from_secs(5)).unwrap_or_default();
    let _ = reader.join();

    Ok(GitOutput {
        status_ok: status.success(),
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

pub fn run_git_ok(cwd: &Path, args: &[&str], timeout: Duration) -> Result<String> {
    let out = run_git(cwd, args, timeout)?;
    if !out.status_ok {
        return Err(EdisonError::GitCommandFailed(format!(
            "git {args:?} failed: {}",
            out.stderr.trim()
        )));
    }
    Ok(out.stdout)
}

/// `git rev-parse --is-inside-work-tree` health check for a worktree path.
pub fn is_inside_work_tree(path: &Path, timeout: Duration) -> bool {
    if !path.is_dir() {
        return false;
    }
    match run_git(path, &["rev-parse", "--is-inside-work-tree"], timeout) {
        Ok(out) => out.status_ok && out.stdout.trim() == "true",
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn run_git_captures_stdout() {
        let dir = tempdir().unwrap();
        run_git_ok(dir.path(), &["init", "--quiet"], Duration::from_secs(5)).unwrap();
        let out = run_git_ok(
            dir.path(),
            &["rev-parse", "--is-inside-work-tree"],
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(out.trim(), "true");
    }

    #[test]
    fn is_inside_work_tree_false_for_non_repo() {
        let dir = tempdir().unwrap();
        assert!(!is_inside_work_tree(dir.path(), Duration::from_secs(2)));
    }

    #[test]
    fn run_git_reports_failure_status() {
        let dir = tempdir().unwrap();
        run_git_ok(dir.path(), &["init", "--quiet"], Duration::from_secs(5)).unwrap();
        let err = run_git_ok(
            dir.path(),
            &["rev-parse", "--verify", "refs/heads/does-not-exist"],
            Duration::from_secs(5),
        );
        assert!(err.is_err());
    }
}
