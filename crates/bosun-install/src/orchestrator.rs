//! Phase sequencing
//!
//! One [`Installer::install`] call drives a whole bootstrap: connectivity,
//! CRDs, namespace, controller release, workload readiness, app-of-apps.
//! Phases run strictly in order and every failure is terminal, tagged with
//! the phase it happened in. Dry runs keep the read-only phases and the
//! helm invocations (with `--dry-run`), and skip everything that would
//! mutate the cluster directly.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bosun_core::{
    config::defaults, InstallError, InstallOutcome, InstallRequest, Phase, ReadinessTarget,
    TargetCategory,
};
use bosun_helm::{render_controller_values, write_values_file, ReleaseSpec};

use crate::backend::Backends;

type PhaseResult = std::result::Result<(), (Phase, InstallError)>;

/// Runs the bootstrap sequence against a resolved backend set
pub struct Installer {
    request: InstallRequest,
    backends: Backends,
}

impl Installer {
    pub fn new(request: InstallRequest, backends: Backends) -> Self {
        Self { request, backends }
    }

    /// Run the full sequence; never panics, never returns a bare error
    pub async fn install(&self, cancel: &CancellationToken) -> InstallOutcome {
        match self.run_phases(cancel).await {
            Ok(()) => {
                info!(cluster = %self.request.cluster, "installation complete");
                InstallOutcome::succeeded()
            }
            Err((phase, error)) => {
                warn!(%phase, %error, "installation failed");
                let diagnostics = self.failure_diagnostics(phase, &error, cancel).await;
                InstallOutcome::failed(phase, &error, diagnostics)
            }
        }
    }

    async fn run_phases(&self, cancel: &CancellationToken) -> PhaseResult {
        self.connectivity_check(cancel).await?;
        self.resource_types(cancel).await?;
        self.namespace_ensure(cancel).await?;
        self.controller_release(cancel).await?;
        self.workloads_ready(cancel).await?;
        self.app_of_apps(cancel).await?;
        Ok(())
    }

    fn gate(&self, phase: Phase, cancel: &CancellationToken) -> PhaseResult {
        if cancel.is_cancelled() {
            Err((phase, InstallError::Cancelled))
        } else {
            Ok(())
        }
    }

    async fn connectivity_check(&self, cancel: &CancellationToken) -> PhaseResult {
        let phase = Phase::ConnectivityCheck;
        self.gate(phase, cancel)?;
        info!(%phase, "checking prerequisites and connectivity");

        self.backends
            .releases
            .ensure_available(cancel)
            .await
            .map_err(|e| (phase, e))?;
        self.backends
            .readiness
            .check_connectivity(cancel)
            .await
            .map_err(|e| (phase, e))?;
        Ok(())
    }

    async fn resource_types(&self, cancel: &CancellationToken) -> PhaseResult {
        if self.request.skip_crds {
            info!("resource type installation skipped by request");
            return Ok(());
        }
        if self.request.dry_run {
            info!("dry run, skipping resource type installation");
            return Ok(());
        }

        let phase = Phase::ResourceTypesInstall;
        self.gate(phase, cancel)?;
        info!(%phase, "applying resource type manifests");
        for url in defaults::CRD_MANIFEST_URLS {
            self.backends
                .manifests
                .apply_url(url, cancel)
                .await
                .map_err(|e| (phase, e))?;
        }

        let phase = Phase::ResourceTypesReady;
        self.gate(phase, cancel)?;
        info!(%phase, "waiting for resource types to register");
        let targets = defaults::CRD_NAMES
            .iter()
            .map(|name| ReadinessTarget::cluster_scoped(TargetCategory::Crd, *name))
            .collect();
        self.backends
            .readiness
            .wait_for(targets, cancel)
            .await
            .map_err(|e| (phase, e))
    }

    async fn namespace_ensure(&self, cancel: &CancellationToken) -> PhaseResult {
        let phase = Phase::NamespaceEnsure;
        self.gate(phase, cancel)?;
        if self.request.dry_run {
            info!("dry run, skipping namespace creation");
            return Ok(());
        }
        info!(%phase, namespace = defaults::CONTROLLER_NAMESPACE, "ensuring namespace");
        self.backends
            .readiness
            .ensure_namespace(defaults::CONTROLLER_NAMESPACE, cancel)
            .await
            .map_err(|e| (phase, e))?;

        // Created is not Active; wait for the phase transition.
        let target = ReadinessTarget::cluster_scoped(
            TargetCategory::Namespace,
            defaults::CONTROLLER_NAMESPACE,
        );
        self.backends
            .readiness
            .wait_for(vec![target], cancel)
            .await
            .map_err(|e| (phase, e))
    }

    async fn controller_release(&self, cancel: &CancellationToken) -> PhaseResult {
        let phase = Phase::ControllerReleaseInstall;
        self.gate(phase, cancel)?;
        info!(%phase, "installing controller release");

        self.backends
            .releases
            .ensure_repo(
                defaults::CONTROLLER_REPO_NAME,
                defaults::CONTROLLER_REPO_URL,
                cancel,
            )
            .await
            .map_err(|e| (phase, e))?;

        let values_yaml = render_controller_values(&self.request).map_err(|e| (phase, e))?;
        // The handle keeps the temp file alive until helm has read it.
        let values_file = write_values_file(&values_yaml).map_err(|e| (phase, e))?;

        let mut spec = ReleaseSpec::new(
            defaults::CONTROLLER_RELEASE,
            defaults::CONTROLLER_CHART,
            defaults::CONTROLLER_NAMESPACE,
        );
        spec.version = Some(defaults::CONTROLLER_CHART_VERSION.to_string());
        spec.values_files.push(values_file.path().to_path_buf());
        spec.skip_chart_crds = true;
        spec.dry_run = self.request.dry_run;
        if let Some(tls) = &self.request.tls {
            spec.set_file_overrides
                .push(("server.certificate.crt".to_string(), tls.cert.clone()));
            spec.set_file_overrides
                .push(("server.certificate.key".to_string(), tls.key.clone()));
        }

        self.backends
            .releases
            .install_or_upgrade(&spec, cancel)
            .await
            .map_err(|e| (phase, e))?;
        drop(values_file);

        if self.request.dry_run {
            info!("dry run, skipping release verification");
            return Ok(());
        }

        let phase = Phase::ControllerReleaseVerify;
        self.gate(phase, cancel)?;
        let exists = self
            .backends
            .releases
            .release_exists(
                defaults::CONTROLLER_RELEASE,
                defaults::CONTROLLER_NAMESPACE,
                cancel,
            )
            .await
            .map_err(|e| (phase, e))?;
        if !exists {
            return Err((
                phase,
                InstallError::ReleaseVerificationFailure {
                    release: defaults::CONTROLLER_RELEASE.to_string(),
                    namespace: defaults::CONTROLLER_NAMESPACE.to_string(),
                },
            ));
        }
        Ok(())
    }

    async fn workloads_ready(&self, cancel: &CancellationToken) -> PhaseResult {
        if self.request.dry_run {
            info!("dry run, skipping workload readiness");
            return Ok(());
        }
        let phase = Phase::WorkloadsReady;
        self.gate(phase, cancel)?;
        info!(%phase, "waiting for controller workloads");

        self.backends
            .readiness
            .wait_api_port(cancel)
            .await
            .map_err(|e| (phase, e))?;

        let targets = vec![
            ReadinessTarget::namespaced(
                TargetCategory::Deployment,
                defaults::CONTROLLER_DEPLOYMENT,
                defaults::CONTROLLER_NAMESPACE,
            ),
            ReadinessTarget::namespaced(
                TargetCategory::StatefulSet,
                defaults::CONTROLLER_STATEFULSET,
                defaults::CONTROLLER_NAMESPACE,
            ),
        ];
        self.backends
            .readiness
            .wait_for(targets, cancel)
            .await
            .map_err(|e| (phase, e))
    }

    async fn app_of_apps(&self, cancel: &CancellationToken) -> PhaseResult {
        let apps = match &self.request.app_of_apps {
            Some(apps) => apps,
            None => return Ok(()),
        };
        let phase = Phase::AppOfAppsReleaseInstall;
        self.gate(phase, cancel)?;
        info!(%phase, chart = %apps.chart_path, "installing app-of-apps release");

        if !self.request.dry_run {
            self.backends
                .readiness
                .ensure_namespace(&apps.namespace, cancel)
                .await
                .map_err(|e| (phase, e))?;
        }

        let mut spec = ReleaseSpec::new(
            defaults::APP_OF_APPS_RELEASE,
            &apps.chart_path,
            &apps.namespace,
        );
        if let Some(timeout) = &apps.timeout {
            spec.timeout = timeout.clone();
        }
        if let Some(values) = &apps.values_file {
            spec.values_files.push(values.clone());
        }
        spec.dry_run = self.request.dry_run;

        self.backends
            .releases
            .install_or_upgrade(&spec, cancel)
            .await
            .map_err(|e| (phase, e))?;

        if self.request.dry_run {
            return Ok(());
        }
        let exists = self
            .backends
            .releases
            .release_exists(defaults::APP_OF_APPS_RELEASE, &apps.namespace, cancel)
            .await
            .map_err(|e| (phase, e))?;
        if !exists {
            return Err((
                phase,
                InstallError::ReleaseVerificationFailure {
                    release: defaults::APP_OF_APPS_RELEASE.to_string(),
                    namespace: apps.namespace.clone(),
                },
            ));
        }
        Ok(())
    }

    /// Decide whether a failure warrants a namespace snapshot, and take it.
    /// Cancellation never does; a failed release or a workload timeout does.
    async fn failure_diagnostics(
        &self,
        phase: Phase,
        error: &InstallError,
        cancel: &CancellationToken,
    ) -> Option<String> {
        if error.is_cancelled() {
            return None;
        }
        if let Some(attached) = error.diagnostics() {
            return Some(attached.to_string());
        }

        let namespace = match (phase, error) {
            (Phase::ControllerReleaseInstall, InstallError::ReleaseFailed { .. }) => {
                defaults::CONTROLLER_NAMESPACE.to_string()
            }
            (Phase::WorkloadsReady, InstallError::ReadinessTimeout { .. }) => {
                defaults::CONTROLLER_NAMESPACE.to_string()
            }
            (Phase::AppOfAppsReleaseInstall, InstallError::ReleaseFailed { .. }) => self
                .request
                .app_of_apps
                .as_ref()
                .map(|a| a.namespace.clone())?,
            _ => return None,
        };

        self.backends.diagnostics.collect(&namespace, cancel).await
    }
}
