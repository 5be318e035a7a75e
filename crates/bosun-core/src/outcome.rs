//! Run phases and the terminal outcome

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, InstallError};

/// The phases of one orchestration run, in execution order. Every phase is
/// terminal on error; a phase only begins once the previous phase's
/// postcondition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    ConnectivityCheck,
    ResourceTypesInstall,
    ResourceTypesReady,
    NamespaceEnsure,
    ControllerReleaseInstall,
    ControllerReleaseVerify,
    WorkloadsReady,
    AppOfAppsReleaseInstall,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::ConnectivityCheck => "connectivity-check",
            Phase::ResourceTypesInstall => "resource-types-install",
            Phase::ResourceTypesReady => "resource-types-ready",
            Phase::NamespaceEnsure => "namespace-ensure",
            Phase::ControllerReleaseInstall => "controller-release-install",
            Phase::ControllerReleaseVerify => "controller-release-verify",
            Phase::WorkloadsReady => "workloads-ready",
            Phase::AppOfAppsReleaseInstall => "app-of-apps-release-install",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one orchestration run. Returned to the calling
/// command handler; the orchestrator retains nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallOutcome {
    pub success: bool,

    /// Phase at which the run failed, if it did.
    pub failed_phase: Option<Phase>,

    /// Rendered error, if the run failed.
    pub error: Option<String>,

    /// Classification of the error, for exit-code mapping downstream.
    pub error_kind: Option<ErrorKind>,

    /// Whether the failure was an operator-initiated abort.
    pub cancelled: bool,

    /// Failure report captured at the moment of failure. Never present for
    /// cancellation.
    pub diagnostics: Option<String>,
}

impl InstallOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            failed_phase: None,
            error: None,
            error_kind: None,
            cancelled: false,
            diagnostics: None,
        }
    }

    pub fn failed(phase: Phase, error: &InstallError, diagnostics: Option<String>) -> Self {
        let cancelled = error.is_cancelled();
        Self {
            success: false,
            failed_phase: Some(phase),
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            cancelled,
            // No diagnostics for a cancelled run, by contract.
            diagnostics: if cancelled { None } else { diagnostics },
        }
    }

    /// One-line summary suitable for the CLI.
    pub fn summary(&self) -> String {
        if self.success {
            "installation completed".to_string()
        } else if self.cancelled {
            "installation cancelled".to_string()
        } else {
            match (&self.failed_phase, &self.error) {
                (Some(phase), Some(err)) => format!("failed during {}: {}", phase, err),
                _ => "installation failed".to_string(),
            }
        }
    }
}
