//! Backend seams and per-run resolution
//!
//! The orchestrator talks to the cluster through four narrow traits. The
//! production wiring behind them is chosen once per run: a native kube
//! client when one can be built for the requested context, otherwise the
//! kubectl binary. Helm is always a subprocess either way.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bosun_core::{config::defaults, InstallRequest, ReadinessTarget, Result};
use bosun_exec::{CommandRunner, PathTranslator};
use bosun_helm::{HelmInstaller, ReleaseSpec};
use bosun_kube::{
    check_connectivity, wait_for_api_port, Applier, ClusterProbe, DiagnosticsCollector,
    KubectlApplier, KubectlDiagnostics, KubectlProbe, ManifestSource, NativeDiagnostics,
    NativeProbe, ReadinessWaiter,
};

/// How cluster operations are executed for this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionTarget {
    /// Direct API access through a kube client
    Native,
    /// Everything through the kubectl binary
    Subprocess,
}

impl ExecutionTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionTarget::Native => "native",
            ExecutionTarget::Subprocess => "subprocess",
        }
    }
}

/// Applies raw manifests by URL
#[async_trait]
pub trait ManifestApply: Send + Sync {
    async fn apply_url(&self, url: &str, cancel: &CancellationToken) -> Result<()>;
}

/// Readiness and namespace operations
#[async_trait]
pub trait Readiness: Send + Sync {
    /// Confirm the control plane answers, with bounded retries
    async fn check_connectivity(&self, cancel: &CancellationToken) -> Result<()>;

    /// Create the namespace if absent
    async fn ensure_namespace(&self, namespace: &str, cancel: &CancellationToken) -> Result<()>;

    /// Poll until all targets exist or the readiness deadline passes
    async fn wait_for(
        &self,
        targets: Vec<ReadinessTarget>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Raw connect probe against the API endpoint, when one is known
    async fn wait_api_port(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Helm release operations
#[async_trait]
pub trait ReleaseInstall: Send + Sync {
    async fn ensure_available(&self, cancel: &CancellationToken) -> Result<()>;
    async fn ensure_repo(&self, name: &str, url: &str, cancel: &CancellationToken) -> Result<()>;
    async fn install_or_upgrade(&self, spec: &ReleaseSpec, cancel: &CancellationToken)
        -> Result<()>;
    async fn release_exists(
        &self,
        release: &str,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<bool>;
}

/// Failure snapshot provider
#[async_trait]
pub trait DiagnosticsSource: Send + Sync {
    /// Best-effort; returns None when nothing could be gathered
    async fn collect(&self, namespace: &str, cancel: &CancellationToken) -> Option<String>;
}

/// The resolved backend set for one run
#[derive(Clone)]
pub struct Backends {
    pub manifests: Arc<dyn ManifestApply>,
    pub readiness: Arc<dyn Readiness>,
    pub releases: Arc<dyn ReleaseInstall>,
    pub diagnostics: Arc<dyn DiagnosticsSource>,
}

/// Production readiness backend: a probe plus the shared waiter
struct ClusterReadiness {
    probe: Arc<dyn ClusterProbe>,
    waiter: ReadinessWaiter,
    /// host:port of the API endpoint, when resolvable
    api_addr: Option<String>,
}

impl ClusterReadiness {
    fn new(probe: Arc<dyn ClusterProbe>, api_addr: Option<String>) -> Self {
        let waiter = ReadinessWaiter::new(
            Arc::clone(&probe),
            defaults::POLL_INTERVAL,
            defaults::READINESS_TIMEOUT,
        );
        Self {
            probe,
            waiter,
            api_addr,
        }
    }
}

#[async_trait]
impl Readiness for ClusterReadiness {
    async fn check_connectivity(&self, cancel: &CancellationToken) -> Result<()> {
        check_connectivity(
            self.probe.as_ref(),
            defaults::CONNECTIVITY_ATTEMPTS,
            defaults::CONNECTIVITY_DELAY,
            cancel,
        )
        .await
    }

    async fn ensure_namespace(&self, namespace: &str, cancel: &CancellationToken) -> Result<()> {
        self.probe.ensure_namespace(namespace, cancel).await
    }

    async fn wait_for(
        &self,
        targets: Vec<ReadinessTarget>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.waiter.wait_for(targets, cancel).await
    }

    async fn wait_api_port(&self, cancel: &CancellationToken) -> Result<()> {
        match &self.api_addr {
            Some(addr) => {
                wait_for_api_port(
                    addr,
                    defaults::PORT_PROBE_INTERVAL,
                    defaults::PORT_PROBE_TIMEOUT,
                    cancel,
                )
                .await
            }
            None => {
                debug!("API endpoint address unknown, skipping port probe");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ManifestApply for Applier {
    async fn apply_url(&self, url: &str, cancel: &CancellationToken) -> Result<()> {
        self.apply(&ManifestSource::Url(url.to_string()), cancel)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ManifestApply for KubectlApplier {
    async fn apply_url(&self, url: &str, cancel: &CancellationToken) -> Result<()> {
        KubectlApplier::apply_url(self, url, cancel).await
    }
}

#[async_trait]
impl ReleaseInstall for HelmInstaller {
    async fn ensure_available(&self, cancel: &CancellationToken) -> Result<()> {
        HelmInstaller::ensure_available(self, cancel).await
    }

    async fn ensure_repo(&self, name: &str, url: &str, cancel: &CancellationToken) -> Result<()> {
        HelmInstaller::ensure_repo(self, name, url, cancel).await
    }

    async fn install_or_upgrade(
        &self,
        spec: &ReleaseSpec,
        cancel: &CancellationToken,
    ) -> Result<()> {
        HelmInstaller::install_or_upgrade(self, spec, cancel).await
    }

    async fn release_exists(
        &self,
        release: &str,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        HelmInstaller::release_exists(self, release, namespace, cancel).await
    }
}

/// Adapts a report collector into the orchestrator's Option-shaped view
struct ReportSource<C>(C);

#[async_trait]
impl<C: DiagnosticsCollector> DiagnosticsSource for ReportSource<C> {
    async fn collect(&self, namespace: &str, cancel: &CancellationToken) -> Option<String> {
        let report = self.0.collect(namespace, cancel).await;
        if report.is_empty() {
            None
        } else {
            Some(report.render())
        }
    }
}

/// Resolve the backend set for a request
///
/// Tries to build a kube client for the request's context first; when that
/// fails (no kubeconfig, unknown context), falls back to kubectl, and only
/// errors when kubectl is missing too. Helm availability is checked later,
/// in the first phase, so a missing helm reports as a phase failure.
pub async fn resolve_backends(
    request: &InstallRequest,
    cancel: &CancellationToken,
) -> Result<(ExecutionTarget, Backends)> {
    let context = request.kube_context();
    let runner = CommandRunner::new();
    let translator = PathTranslator::for_host(runner.clone());

    let releases: Arc<dyn ReleaseInstall> = Arc::new(build_helm(&runner, &translator, &context));

    match native_client(&context).await {
        Ok((client, api_addr)) => {
            info!(context, "using native cluster access");
            let probe: Arc<dyn ClusterProbe> = Arc::new(NativeProbe::new(client.clone()));
            let backends = Backends {
                manifests: Arc::new(Applier::new(client.clone())?),
                readiness: Arc::new(ClusterReadiness::new(probe, api_addr)),
                releases,
                diagnostics: Arc::new(ReportSource(NativeDiagnostics::new(client))),
            };
            Ok((ExecutionTarget::Native, backends))
        }
        Err(e) => {
            warn!(context, error = %e, "native cluster access unavailable, trying kubectl");
            runner.ensure_tool("kubectl", &["version", "--client"], cancel).await?;
            let api_addr = kubectl_api_addr(&runner, &context, cancel).await;
            let probe: Arc<dyn ClusterProbe> =
                Arc::new(KubectlProbe::new(runner.clone(), context.clone()));
            let backends = Backends {
                manifests: Arc::new(KubectlApplier::new(runner.clone(), context.clone())),
                readiness: Arc::new(ClusterReadiness::new(probe, api_addr)),
                releases,
                diagnostics: Arc::new(ReportSource(KubectlDiagnostics::new(runner, context))),
            };
            Ok((ExecutionTarget::Subprocess, backends))
        }
    }
}

fn build_helm(runner: &CommandRunner, translator: &PathTranslator, context: &str) -> HelmInstaller {
    let installer = HelmInstaller::new(runner.clone(), translator.clone(), context);
    match dirs::cache_dir() {
        Some(cache) => installer.with_isolated_state(&cache.join("bosun").join("helm")),
        None => installer,
    }
}

/// Build a client bound to the explicit context, never the ambient default
async fn native_client(context: &str) -> Result<(Client, Option<String>)> {
    let options = KubeConfigOptions {
        context: Some(context.to_string()),
        ..Default::default()
    };
    let config = Config::from_kubeconfig(&options)
        .await
        .map_err(bosun_core::InstallError::api)?;
    let api_addr = endpoint_addr(config.cluster_url.to_string().as_str());
    let client = Client::try_from(config).map_err(bosun_core::InstallError::api)?;
    Ok((client, api_addr))
}

/// host:port from a cluster server URL
fn endpoint_addr(server: &str) -> Option<String> {
    let parsed = url::Url::parse(server).ok()?;
    let host = parsed.host_str()?;
    let port = parsed.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
}

/// Resolve the API endpoint through kubectl; None when it cannot be read
async fn kubectl_api_addr(
    runner: &CommandRunner,
    context: &str,
    cancel: &CancellationToken,
) -> Option<String> {
    let args = vec![
        "config".to_string(),
        "view".to_string(),
        "--minify".to_string(),
        "--context".to_string(),
        context.to_string(),
        "-o".to_string(),
        "jsonpath={.clusters[0].cluster.server}".to_string(),
    ];
    let result = runner
        .run("kubectl", &args, &HashMap::new(), Duration::from_secs(15), cancel)
        .await
        .ok()?;
    if !result.success() {
        return None;
    }
    endpoint_addr(result.stdout.trim())
}
