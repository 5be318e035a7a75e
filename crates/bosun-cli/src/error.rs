//! CLI error types with exit code handling
//!
//! Maps installation outcomes and request problems onto exit codes and
//! miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

pub type Result<T> = std::result::Result<T, CliError>;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Invalid arguments or request configuration
    #[error("Invalid request: {message}")]
    #[diagnostic(code(bosun::cli::usage))]
    Usage {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// A phase of the installation failed
    #[error("{message}")]
    #[diagnostic(code(bosun::cli::install))]
    Install {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// The cluster API server was unreachable
    #[error("{message}")]
    #[diagnostic(code(bosun::cli::connectivity))]
    Connectivity {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Resources never became ready before their deadline
    #[error("{message}")]
    #[diagnostic(code(bosun::cli::readiness_timeout))]
    ReadinessTimeout { message: String },

    /// Cancelled by the operator
    #[error("Installation cancelled")]
    #[diagnostic(code(bosun::cli::cancelled))]
    Cancelled,
}

impl CliError {
    pub fn usage(message: impl Into<String>) -> Self {
        CliError::Usage {
            message: message.into(),
            help: None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Install { .. } => exit_codes::ERROR,
            CliError::Connectivity { .. } => exit_codes::CONNECTIVITY_ERROR,
            CliError::ReadinessTimeout { .. } => exit_codes::READINESS_TIMEOUT,
            CliError::Cancelled => exit_codes::CANCELLED,
        }
    }
}
