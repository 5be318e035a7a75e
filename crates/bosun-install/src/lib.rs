//! Installation orchestrator
//!
//! Sequences the bootstrap phases over pluggable backends: manifest apply,
//! readiness, release install, and diagnostics each sit behind a trait so
//! the orchestrator itself never cares whether the cluster is reached
//! natively or through kubectl. Backend resolution happens once per run.

pub mod backend;
pub mod orchestrator;

pub use backend::{
    resolve_backends, Backends, DiagnosticsSource, ExecutionTarget, ManifestApply, Readiness,
    ReleaseInstall,
};
pub use orchestrator::Installer;
