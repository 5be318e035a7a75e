//! Orchestrator sequencing tests over scripted backends
//!
//! Every backend call is recorded into a shared event log, so the tests
//! assert the one property the orchestrator exists for: phases run in
//! order, stop at the first failure, and report what failed and why.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use bosun_core::{
    config::{defaults, AppOfAppsConfig},
    InstallError, InstallRequest, Phase, ReadinessTarget,
};
use bosun_helm::ReleaseSpec;
use bosun_install::{
    Backends, DiagnosticsSource, Installer, ManifestApply, Readiness, ReleaseInstall,
};

type EventLog = Arc<Mutex<Vec<String>>>;

fn log(events: &EventLog, entry: impl Into<String>) {
    events.lock().unwrap().push(entry.into());
}

#[derive(Clone, Default)]
struct Script {
    /// Fail `wait_for` calls whose targets include this name.
    never_ready: Option<String>,
    /// Report the named release as missing from `helm list`.
    missing_release: Option<String>,
    /// Fail the named release's install outright.
    failing_release: Option<String>,
}

struct FakeBackend {
    events: EventLog,
    script: Script,
}

#[async_trait]
impl ManifestApply for FakeBackend {
    async fn apply_url(&self, url: &str, _cancel: &CancellationToken) -> bosun_core::Result<()> {
        log(&self.events, format!("apply {}", url));
        Ok(())
    }
}

#[async_trait]
impl Readiness for FakeBackend {
    async fn check_connectivity(&self, _cancel: &CancellationToken) -> bosun_core::Result<()> {
        log(&self.events, "connectivity");
        Ok(())
    }

    async fn ensure_namespace(
        &self,
        namespace: &str,
        _cancel: &CancellationToken,
    ) -> bosun_core::Result<()> {
        log(&self.events, format!("ensure-namespace {}", namespace));
        Ok(())
    }

    async fn wait_for(
        &self,
        targets: Vec<ReadinessTarget>,
        _cancel: &CancellationToken,
    ) -> bosun_core::Result<()> {
        let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        log(&self.events, format!("wait-for {}", names.join(",")));
        if let Some(stuck) = &self.script.never_ready {
            if names.iter().any(|n| n == stuck) {
                return Err(InstallError::ReadinessTimeout {
                    elapsed: Duration::from_secs(300),
                    missing: targets,
                });
            }
        }
        Ok(())
    }

    async fn wait_api_port(&self, _cancel: &CancellationToken) -> bosun_core::Result<()> {
        log(&self.events, "wait-api-port");
        Ok(())
    }
}

#[async_trait]
impl ReleaseInstall for FakeBackend {
    async fn ensure_available(&self, _cancel: &CancellationToken) -> bosun_core::Result<()> {
        log(&self.events, "helm-available");
        Ok(())
    }

    async fn ensure_repo(
        &self,
        name: &str,
        _url: &str,
        _cancel: &CancellationToken,
    ) -> bosun_core::Result<()> {
        log(&self.events, format!("ensure-repo {}", name));
        Ok(())
    }

    async fn install_or_upgrade(
        &self,
        spec: &ReleaseSpec,
        _cancel: &CancellationToken,
    ) -> bosun_core::Result<()> {
        log(
            &self.events,
            format!(
                "install {} chart={} dry_run={}",
                spec.release, spec.chart, spec.dry_run
            ),
        );
        if self.script.failing_release.as_deref() == Some(spec.release.as_str()) {
            return Err(InstallError::ReleaseFailed {
                release: spec.release.clone(),
                message: "helm exited 1".to_string(),
                diagnostics: None,
            });
        }
        Ok(())
    }

    async fn release_exists(
        &self,
        release: &str,
        _namespace: &str,
        _cancel: &CancellationToken,
    ) -> bosun_core::Result<bool> {
        log(&self.events, format!("verify {}", release));
        Ok(self.script.missing_release.as_deref() != Some(release))
    }
}

#[async_trait]
impl DiagnosticsSource for FakeBackend {
    async fn collect(&self, namespace: &str, _cancel: &CancellationToken) -> Option<String> {
        log(&self.events, format!("diagnostics {}", namespace));
        Some(format!("=== pods in {} ===\n  argocd-server Pending", namespace))
    }
}

fn harness(script: Script) -> (EventLog, Backends) {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let backend = Arc::new(FakeBackend {
        events: Arc::clone(&events),
        script,
    });
    let backends = Backends {
        manifests: backend.clone(),
        readiness: backend.clone(),
        releases: backend.clone(),
        diagnostics: backend,
    };
    (events, backends)
}

fn request_with_apps() -> InstallRequest {
    let mut request = InstallRequest::for_cluster("demo");
    request.app_of_apps = Some(AppOfAppsConfig {
        chart_path: "./apps".to_string(),
        values_file: None,
        namespace: "argocd".to_string(),
        timeout: Some("5m".to_string()),
    });
    request
}

#[tokio::test]
async fn full_run_executes_phases_in_order() {
    let (events, backends) = harness(Script::default());
    let outcome = Installer::new(request_with_apps(), backends)
        .install(&CancellationToken::new())
        .await;

    assert!(outcome.success, "unexpected failure: {:?}", outcome.error);
    let events = events.lock().unwrap().clone();
    assert_eq!(events[0], "helm-available");
    assert_eq!(events[1], "connectivity");
    assert!(events[2].starts_with("apply https://"));
    assert!(events[4].starts_with("apply https://"));
    assert!(events[5].starts_with("wait-for applications.argoproj.io"));
    assert_eq!(events[6], "ensure-namespace argocd");
    assert_eq!(events[7], "wait-for argocd");
    assert_eq!(events[8], "ensure-repo argo");
    assert!(events[9].starts_with("install argocd chart=argo/argo-cd"));
    assert_eq!(events[10], "verify argocd");
    assert_eq!(events[11], "wait-api-port");
    assert!(events[12].starts_with("wait-for argocd-server,argocd-application-controller"));
    assert_eq!(events[13], "ensure-namespace argocd");
    assert!(events[14].starts_with("install root-apps chart=./apps"));
    assert_eq!(events[15], "verify root-apps");
    assert_eq!(events.len(), 16);
}

#[tokio::test]
async fn skip_crds_omits_resource_type_phases() {
    let (events, backends) = harness(Script::default());
    let mut request = InstallRequest::for_cluster("demo");
    request.skip_crds = true;

    let outcome = Installer::new(request, backends)
        .install(&CancellationToken::new())
        .await;

    assert!(outcome.success);
    let events = events.lock().unwrap().clone();
    assert!(!events.iter().any(|e| e.starts_with("apply ")));
    assert!(!events
        .iter()
        .any(|e| e.starts_with("wait-for applications.argoproj.io")));
}

#[tokio::test]
async fn dry_run_keeps_helm_and_skips_mutations() {
    let (events, backends) = harness(Script::default());
    let mut request = request_with_apps();
    request.dry_run = true;

    let outcome = Installer::new(request, backends)
        .install(&CancellationToken::new())
        .await;

    assert!(outcome.success);
    let events = events.lock().unwrap().clone();
    assert!(events.contains(&"connectivity".to_string()));
    assert!(!events.iter().any(|e| e.starts_with("apply ")));
    assert!(!events.iter().any(|e| e.starts_with("ensure-namespace")));
    assert!(!events.iter().any(|e| e.starts_with("verify")));
    assert!(!events.iter().any(|e| e.starts_with("wait-")));
    assert!(events
        .iter()
        .any(|e| e.starts_with("install argocd") && e.ends_with("dry_run=true")));
    assert!(events
        .iter()
        .any(|e| e.starts_with("install root-apps") && e.ends_with("dry_run=true")));
}

#[tokio::test]
async fn workload_timeout_reports_missing_and_collects_diagnostics() {
    let (events, backends) = harness(Script {
        never_ready: Some(defaults::CONTROLLER_DEPLOYMENT.to_string()),
        ..Default::default()
    });
    let outcome = Installer::new(InstallRequest::for_cluster("demo"), backends)
        .install(&CancellationToken::new())
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.failed_phase, Some(Phase::WorkloadsReady));
    let error = outcome.error.unwrap();
    assert!(error.contains("argocd-server"));
    assert!(error.contains("argocd-application-controller"));
    let diagnostics = outcome.diagnostics.unwrap();
    assert!(diagnostics.contains("pods in argocd"));
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| e == "diagnostics argocd"));
}

#[tokio::test]
async fn failed_release_attaches_diagnostics() {
    let (_events, backends) = harness(Script {
        failing_release: Some("argocd".to_string()),
        ..Default::default()
    });
    let outcome = Installer::new(InstallRequest::for_cluster("demo"), backends)
        .install(&CancellationToken::new())
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.failed_phase, Some(Phase::ControllerReleaseInstall));
    assert!(outcome.diagnostics.is_some());
}

#[tokio::test]
async fn silent_install_success_is_caught_by_verification() {
    let (_events, backends) = harness(Script {
        missing_release: Some("argocd".to_string()),
        ..Default::default()
    });
    let outcome = Installer::new(InstallRequest::for_cluster("demo"), backends)
        .install(&CancellationToken::new())
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.failed_phase, Some(Phase::ControllerReleaseVerify));
    assert!(outcome.error.unwrap().contains("absent"));
}

#[tokio::test]
async fn app_of_apps_verification_failure() {
    let (_events, backends) = harness(Script {
        missing_release: Some("root-apps".to_string()),
        ..Default::default()
    });
    let outcome = Installer::new(request_with_apps(), backends)
        .install(&CancellationToken::new())
        .await;

    assert!(!outcome.success);
    assert_eq!(
        outcome.failed_phase,
        Some(Phase::AppOfAppsReleaseInstall)
    );
}

#[tokio::test]
async fn cancellation_before_start_reports_cancelled_without_diagnostics() {
    let (events, backends) = harness(Script::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = Installer::new(InstallRequest::for_cluster("demo"), backends)
        .install(&cancel)
        .await;

    assert!(!outcome.success);
    assert!(outcome.cancelled);
    assert_eq!(outcome.failed_phase, Some(Phase::ConnectivityCheck));
    assert!(outcome.diagnostics.is_none());
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn no_app_of_apps_ends_after_workloads() {
    let (events, backends) = harness(Script::default());
    let outcome = Installer::new(InstallRequest::for_cluster("demo"), backends)
        .install(&CancellationToken::new())
        .await;

    assert!(outcome.success);
    let events = events.lock().unwrap().clone();
    assert!(!events.iter().any(|e| e.contains("root-apps")));
    assert!(events
        .last()
        .is_some_and(|e| e.starts_with("wait-for argocd-server")));
}
