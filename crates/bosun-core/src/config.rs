//! Install request configuration
//!
//! An `InstallRequest` is built once per command invocation and is read-only
//! for the rest of the run. All tunables that are not user input live in the
//! `defaults` module as fixed constants.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{InstallError, Result};

/// Fixed installation constants. These are deliberately not user input.
pub mod defaults {
    use std::time::Duration;

    /// Name of the controller helm release.
    pub const CONTROLLER_RELEASE: &str = "argocd";

    /// Chart reference for the controller release.
    pub const CONTROLLER_CHART: &str = "argo/argo-cd";

    /// Pinned controller chart version.
    pub const CONTROLLER_CHART_VERSION: &str = "5.46.8";

    /// Helm repository backing the controller chart.
    pub const CONTROLLER_REPO_NAME: &str = "argo";
    pub const CONTROLLER_REPO_URL: &str = "https://argoproj.github.io/argo-helm";

    /// Namespace the control plane is installed into.
    pub const CONTROLLER_NAMESPACE: &str = "argocd";

    /// Name of the root app-of-apps release.
    pub const APP_OF_APPS_RELEASE: &str = "root-apps";

    /// CRD manifests applied before the controller release. Each URL returns
    /// a multi-document YAML blob.
    pub const CRD_MANIFEST_URLS: &[&str] = &[
        "https://raw.githubusercontent.com/argoproj/argo-cd/v2.8.4/manifests/crds/application-crd.yaml",
        "https://raw.githubusercontent.com/argoproj/argo-cd/v2.8.4/manifests/crds/appproject-crd.yaml",
        "https://raw.githubusercontent.com/argoproj/argo-cd/v2.8.4/manifests/crds/applicationset-crd.yaml",
    ];

    /// CRD names the readiness waiter confirms before any release install.
    pub const CRD_NAMES: &[&str] = &[
        "applications.argoproj.io",
        "appprojects.argoproj.io",
        "applicationsets.argoproj.io",
    ];

    /// Controller workloads the waiter confirms exist before the app-of-apps
    /// release. Existence is the bar; helm's own `--wait` covers liveness.
    pub const CONTROLLER_DEPLOYMENT: &str = "argocd-server";
    pub const CONTROLLER_STATEFULSET: &str = "argocd-application-controller";

    /// Context name passed to every subprocess invocation is this prefix
    /// plus the cluster identifier.
    pub const KUBE_CONTEXT_PREFIX: &str = "k3d-";

    /// Timeout handed to `helm --timeout` for the controller release.
    pub const HELM_TIMEOUT: &str = "10m0s";

    /// Readiness polling cadence.
    pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
    pub const READINESS_TIMEOUT: Duration = Duration::from_secs(300);

    /// API port probe before workload polling begins.
    pub const PORT_PROBE_INTERVAL: Duration = Duration::from_secs(2);
    pub const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Connectivity check retries.
    pub const CONNECTIVITY_ATTEMPTS: u32 = 3;
    pub const CONNECTIVITY_DELAY: Duration = Duration::from_secs(2);

    /// HTTP fetch bound for CRD manifest downloads.
    pub const MANIFEST_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
}

/// How the control plane is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentMode {
    #[default]
    TenantOss,
    TenantSaas,
    SharedSaas,
}

impl DeploymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::TenantOss => "tenant-oss",
            DeploymentMode::TenantSaas => "tenant-saas",
            DeploymentMode::SharedSaas => "shared-saas",
        }
    }
}

impl std::str::FromStr for DeploymentMode {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tenant-oss" => Ok(DeploymentMode::TenantOss),
            "tenant-saas" => Ok(DeploymentMode::TenantSaas),
            "shared-saas" => Ok(DeploymentMode::SharedSaas),
            other => Err(InstallError::InvalidRequest(format!(
                "unknown deployment mode '{}' (expected tenant-oss, tenant-saas or shared-saas)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the root app-of-apps release.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppOfAppsConfig {
    /// Chart path (a local directory or a repo-qualified reference).
    pub chart_path: String,

    /// Values file merged into the release.
    pub values_file: Option<PathBuf>,

    /// Target namespace for the release.
    pub namespace: String,

    /// Helm timeout, e.g. "5m" or "90s". Parsed at request validation.
    pub timeout: Option<String>,
}

impl AppOfAppsConfig {
    /// Parse the configured timeout, falling back to the controller default.
    pub fn helm_timeout(&self) -> Result<Duration> {
        match &self.timeout {
            None => humantime::parse_duration(defaults::HELM_TIMEOUT)
                .map_err(|e| InstallError::Internal(format!("default helm timeout: {}", e))),
            Some(s) => humantime::parse_duration(s).map_err(|e| {
                InstallError::InvalidRequest(format!("invalid app-of-apps timeout '{}': {}", s, e))
            }),
        }
    }
}

/// Template inputs for the controller release values document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Flat `key=value` overrides merged into the rendered values.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// TLS certificate/key pair injected into the controller release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Immutable configuration for one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallRequest {
    /// Target cluster identifier. The kube context selector is derived from
    /// this (`k3d-<cluster>`), never taken from the ambient default.
    pub cluster: String,

    /// Deployment mode.
    #[serde(default)]
    pub mode: DeploymentMode,

    /// Skip CRD installation and readiness (pre-provisioned environments).
    #[serde(default)]
    pub skip_crds: bool,

    /// Validate and render without mutating the cluster.
    #[serde(default)]
    pub dry_run: bool,

    /// Suppress progress output.
    #[serde(default)]
    pub silent: bool,

    /// Verbose logging.
    #[serde(default)]
    pub debug: bool,

    /// Never prompt; fail instead.
    #[serde(default)]
    pub non_interactive: bool,

    /// Root app-of-apps release, when configured.
    #[serde(default)]
    pub app_of_apps: Option<AppOfAppsConfig>,

    /// Controller values inputs.
    #[serde(default)]
    pub controller: Option<ControllerConfig>,

    /// TLS pair for the controller's server endpoint.
    #[serde(default)]
    pub tls: Option<TlsFiles>,
}

impl InstallRequest {
    /// Minimal request for a named cluster; everything else defaulted.
    pub fn for_cluster(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            mode: DeploymentMode::default(),
            skip_crds: false,
            dry_run: false,
            silent: false,
            debug: false,
            non_interactive: false,
            app_of_apps: None,
            controller: None,
            tls: None,
        }
    }

    /// The explicit kube context selector for this run.
    pub fn kube_context(&self) -> String {
        format!("{}{}", defaults::KUBE_CONTEXT_PREFIX, self.cluster)
    }

    /// Fail fast on anything that would otherwise surface mid-run.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.is_empty() {
            return Err(InstallError::InvalidRequest(
                "cluster identifier must not be empty".to_string(),
            ));
        }
        if let Some(tls) = &self.tls {
            if !tls.cert.exists() {
                return Err(InstallError::InvalidRequest(format!(
                    "TLS certificate file not found: {}",
                    tls.cert.display()
                )));
            }
            if !tls.key.exists() {
                return Err(InstallError::InvalidRequest(format!(
                    "TLS key file not found: {}",
                    tls.key.display()
                )));
            }
        }
        if let Some(apps) = &self.app_of_apps {
            // Surfaces an invalid duration string before any phase runs.
            apps.helm_timeout()?;
            if apps.namespace.is_empty() {
                return Err(InstallError::InvalidRequest(
                    "app-of-apps namespace must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
