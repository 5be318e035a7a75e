//! Error taxonomy shared by every bosun component
//!
//! Transient conditions (not-found while polling, already-exists during
//! apply, sporadic API errors) are absorbed at the call site and never
//! surface through this type. Everything here is terminal for the run,
//! except where the orchestrator explicitly retries (connectivity).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::target::ReadinessTarget;

/// Result type for bosun operations
pub type Result<T> = std::result::Result<T, InstallError>;

/// Coarse failure classification carried into [`crate::InstallOutcome`],
/// where the full error has already been rendered to a string. Drives the
/// CLI's exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// A required external program is missing from the host.
    ToolUnavailable,
    /// Control plane unreachable.
    Connectivity,
    /// A readiness wait exceeded its deadline.
    ReadinessTimeout,
    /// Operator-initiated abort.
    Cancelled,
    /// Everything else.
    Other,
}

/// Errors that can terminate an orchestration run
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InstallError {
    /// A required external program is missing from the host.
    #[error("required tool '{tool}' not found on PATH")]
    ToolUnavailable { tool: String },

    /// Control plane unreachable after bounded retries.
    #[error("control plane unreachable after {attempts} attempt(s): {last}")]
    ConnectivityFailure { attempts: u32, last: String },

    /// Resource creation/update rejected for a reason other than
    /// already-exists.
    #[error("failed to apply {kind}/{name}: {message}")]
    ApplyFailure {
        kind: String,
        name: String,
        message: String,
    },

    /// Poll deadline exceeded; carries the still-missing targets.
    #[error("timed out after {elapsed:?} waiting for: {}", describe_targets(missing))]
    ReadinessTimeout {
        elapsed: std::time::Duration,
        missing: Vec<ReadinessTarget>,
    },

    /// Install reported success but the release is absent from the
    /// package manager's own listing - a silent no-op, not an execution
    /// error.
    #[error("release '{release}' reported installed but is absent from namespace '{namespace}'")]
    ReleaseVerificationFailure { release: String, namespace: String },

    /// A release install/upgrade invocation failed outright. Diagnostics
    /// are captured at the moment of failure, before any further mutation.
    #[error("release '{release}' failed: {message}")]
    ReleaseFailed {
        release: String,
        message: String,
        diagnostics: Option<String>,
    },

    /// Operator-initiated abort. Takes precedence over diagnostics
    /// collection; propagated unwrapped.
    #[error("installation cancelled")]
    Cancelled,

    /// Subprocess exited non-zero.
    #[error("'{program}' exited with code {exit_code}: {stderr}")]
    CommandFailed {
        program: String,
        exit_code: i32,
        stderr: String,
    },

    /// Subprocess exceeded its wait bound.
    #[error("'{program}' did not finish within {timeout:?}")]
    CommandTimeout {
        program: String,
        timeout: std::time::Duration,
    },

    /// Path could not be translated for the target execution environment.
    #[error("cannot translate path '{path}': {message}")]
    PathTranslation { path: String, message: String },

    /// Manifest fetch failed (non-200, timeout, transport error).
    #[error("failed to fetch manifest from {url}: {message}")]
    Http { url: String, message: String },

    /// Manifest could not be decoded into resources.
    #[error("invalid manifest: {0}")]
    Manifest(String),

    /// Control-plane API error outside the transient set.
    #[error("cluster API error: {0}")]
    Api(String),

    /// Request rejected before any phase ran.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl InstallError {
    /// Whether this error is an operator-initiated abort. Callers must not
    /// collect diagnostics or touch the cluster once this returns true.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, InstallError::Cancelled)
    }

    /// Coarse classification for outcome reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstallError::ToolUnavailable { .. } => ErrorKind::ToolUnavailable,
            InstallError::ConnectivityFailure { .. } => ErrorKind::Connectivity,
            InstallError::ReadinessTimeout { .. } => ErrorKind::ReadinessTimeout,
            InstallError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Other,
        }
    }

    /// Build an `Api` error from anything displayable.
    pub fn api(err: impl std::fmt::Display) -> Self {
        InstallError::Api(err.to_string())
    }

    /// Pull the attached diagnostics report out, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            InstallError::ReleaseFailed { diagnostics, .. } => diagnostics.as_deref(),
            _ => None,
        }
    }
}

fn describe_targets(targets: &[ReadinessTarget]) -> String {
    if targets.is_empty() {
        return "no targets".to_string();
    }
    targets
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
