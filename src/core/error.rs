//! Error taxonomy for Edison operations.
//!
//! Every subsystem returns `Result<T, EdisonError>`. Variants are grouped to
//! mirror the error kinds named by the workflow engine's error-handling
//! design rather than individual call sites, so CLI/JSON translation stays
//! stable even as internals change.

use std::io;
use thiserror::Error;

/// Canonical error type for all Edison operations.
#[derive(Error, Debug)]
pub enum EdisonError {
    // --- Path / identity ---
    #[error("could not locate a project root (no .project/.edison directory or git root found)")]
    ProjectRootNotFound,

    #[error("ambiguous id '{token}' matches {} candidates: {}", .candidates.len(), .candidates.join(", "))]
    AmbiguousId {
        token: String,
        candidates: Vec<String>,
    },

    #[error("invalid id suffix for '{id}': expected a task id or a '-qa'/'.qa' suffixed QA id")]
    InvalidIdSuffix { id: String },

    // --- I/O ---
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("atomic write failed for {path}: {reason}")]
    AtomicWriteFailed { path: String, reason: String },

    #[error("file not found: {0}")]
    FileNotFound(String),

    // --- Lock ---
    #[error("lock acquisition for {target} timed out after {timeout_secs}s")]
    LockTimeout { target: String, timeout_secs: f64 },

    // --- State machine ---
    #[error("no allowed transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("guard denied: {0}")]
    GuardDenied(String),

    #[error("condition '{name}' failed: {message}")]
    ConditionFailed { name: String, message: String },

    // --- Config ---
    #[error("configuration section missing: {0}")]
    ConfigSectionMissing(String),

    #[error("invalid field '{field}' in preset '{preset}'")]
    InvalidPresetField { preset: String, field: String },

    #[error("composition validation failed for entity '{entity}' in layer '{layer}': {reason}")]
    CompositionValidation {
        entity: String,
        layer: String,
        reason: String,
    },

    // --- Git / worktree ---
    #[error("git worktree add failed: {0}")]
    WorktreeAddFailed(String),

    #[error("worktree health check failed at {0}")]
    WorktreeHealthCheckFailed(String),

    #[error("protected path violation: {0}")]
    ProtectedPathViolation(String),

    #[error("git command failed: {0}")]
    GitCommandFailed(String),

    #[error("git operation timed out after {0}s")]
    GitTimeout(f64),

    // --- Evidence ---
    #[error("evidence schema violation: {0}")]
    EvidenceSchemaViolation(String),

    #[error("required command '{command}' exited with code {exit_code}")]
    RequiredCommandFailed { command: String, exit_code: i32 },

    #[error("missing required evidence files: {0:?}")]
    MissingRequiredEvidence(Vec<String>),

    // --- Vendor ---
    #[error("vendor path escapes repository root: {0}")]
    VendorPathEscapesRoot(String),

    #[error("vendor URL embeds credentials: {0}")]
    VendorCredentialInUrl(String),

    #[error("vendor field looks like an injected option: {0}")]
    VendorOptionInjection(String),

    #[error("vendor cache directory is outside the allow-listed roots: {0}")]
    VendorCacheDirDisallowed(String),

    // --- Generic ---
    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl EdisonError {
    /// Stable error code for JSON-mode CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            EdisonError::ProjectRootNotFound => "PROJECT_ROOT_NOT_FOUND",
            EdisonError::AmbiguousId { .. } => "AMBIGUOUS_ID",
            EdisonError::InvalidIdSuffix { .. } => "INVALID_ID_SUFFIX",
            EdisonError::Io(_) => "IO_ERROR",
            EdisonError::Yaml(_) => "INVALID_YAML",
            EdisonError::Json(_) => "INVALID_JSON",
            EdisonError::AtomicWriteFailed { .. } => "ATOMIC_WRITE_FAILED",
            EdisonError::FileNotFound(_) => "FILE_NOT_FOUND",
            EdisonError::LockTimeout { .. } => "LOCK_TIMEOUT",
            EdisonError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EdisonError::GuardDenied(_) => "GUARD_DENIED",
            EdisonError::ConditionFailed { .. } => "CONDITION_FAILED",
            EdisonError::ConfigSectionMissing(_) => "CONFIG_SECTION_MISSING",
            EdisonError::InvalidPresetField { .. } => "INVALID_PRESET_FIELD",
            EdisonError::CompositionValidation { .. } => "COMPOSITION_VALIDATION_ERROR",
            EdisonError::WorktreeAddFailed(_) => "WORKTREE_ADD_FAILED",
            EdisonError::WorktreeHealthCheckFailed(_) => "WORKTREE_HEALTH_CHECK_FAILED",
            EdisonError::ProtectedPathViolation(_) => "PROTECTED_PATH_VIOLATION",
            EdisonError::GitCommandFailed(_) => "GIT_COMMAND_FAILED",
            EdisonError::GitTimeout(_) => "GIT_TIMEOUT",
            EdisonError::EvidenceSchemaViolation(_) => "EVIDENCE_SCHEMA_VIOLATION",
            EdisonError::RequiredCommandFailed { .. } => "REQUIRED_COMMAND_FAILED",
            EdisonError::MissingRequiredEvidence(_) => "MISSING_REQUIRED_EVIDENCE",
            EdisonError::VendorPathEscapesRoot(_) => "VENDOR_PATH_ESCAPES_ROOT",
            EdisonError::VendorCredentialInUrl(_) => "VENDOR_CREDENTIAL_IN_URL",
            EdisonError::VendorOptionInjection(_) => "VENDOR_OPTION_INJECTION",
            EdisonError::VendorCacheDirDisallowed(_) => "VENDOR_CACHE_DIR_DISALLOWED",
            EdisonError::NotFound(_) => "NOT_FOUND",
            EdisonError::Cancelled => "CANCELLED",
            EdisonError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Process exit code per the CLI contract: 0 success, 1 handled error, 130 cancel.
    pub fn exit_code(&self) -> i32 {
        match self {
            EdisonError::Cancelled => 130,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, EdisonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_failed_display() {
        let err = EdisonError::ConditionFailed {
            name: "children-not-done".into(),
            message: "child task 201.1 is not terminal".into(),
        };
        assert_eq!(err.code(), "CONDITION_FAILED");
        assert!(format!("{err}").contains("children-not-done"));
    }

    #[test]
    fn cancelled_exit_code_is_130() {
        assert_eq!(EdisonError::Cancelled.exit_code(), 130);
        assert_eq!(EdisonError::NotFound("x".into()).exit_code(), 1);
    }

    #[test]
    fn ambiguous_id_lists_candidates() {
        let err = EdisonError::AmbiguousId {
            token: "150".into(),
            candidates: vec!["150-a".into(), "150-b".into()],
        };
        assert_eq!(err.code(), "AMBIGUOUS_ID");
        assert!(format!("{err}").contains("150-a"));
    }
}
