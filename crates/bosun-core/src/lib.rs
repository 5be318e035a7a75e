//! Bosun Core - shared types for the GitOps bootstrap installer
//!
//! This crate provides the foundational types used throughout bosun:
//! - `InstallRequest`: immutable configuration for one orchestration run
//! - `InstallOutcome` / `Phase`: terminal result of a run and the phase machine
//! - `InstallError`: error taxonomy shared by every component
//! - `ReadinessTarget`: one named condition the orchestrator must observe
//! - `poll_until`: the single bounded-poll primitive behind every readiness check

pub mod config;
pub mod error;
pub mod outcome;
pub mod poll;
pub mod target;

pub use config::{
    AppOfAppsConfig, ControllerConfig, DeploymentMode, InstallRequest, TlsFiles,
};
pub use error::{ErrorKind, InstallError, Result};
pub use outcome::{InstallOutcome, Phase};
pub use poll::{poll_until, PollError};
pub use target::{CommandResult, ReadinessTarget, TargetCategory};
