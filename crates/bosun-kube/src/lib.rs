//! Cluster operations for bosun
//!
//! This crate covers everything bosun does against a Kubernetes cluster
//! apart from helm itself:
//! - Fetching and applying raw manifests (CRDs) via the API or kubectl
//! - Probing resource existence through a backend-neutral [`ClusterProbe`]
//! - Bounded readiness polling over sets of targets
//! - Collecting pod/event/log diagnostics when an install goes sideways

pub mod applier;
pub mod diagnostics;
pub mod manifest;
pub mod probe;
pub mod readiness;

pub use applier::{fetch_manifest, Applier, KubectlApplier, ManifestSource};
pub use diagnostics::{
    DiagnosticsCollector, DiagnosticsReport, KubectlDiagnostics, NativeDiagnostics,
};
pub use manifest::{parse_manifest, ManifestResource};
pub use probe::{ClusterProbe, KubectlProbe, NativeProbe};
pub use readiness::{check_connectivity, wait_for_api_port, ReadinessWaiter};
