//! Install command - bootstrap the control plane onto a cluster

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use bosun_core::{
    config::{AppOfAppsConfig, ControllerConfig, TlsFiles},
    ErrorKind, InstallOutcome, InstallRequest,
};
use bosun_install::{resolve_backends, Installer};

use crate::display;
use crate::error::{CliError, Result};

/// Parsed flags for `bosun install`
pub struct InstallArgs {
    pub cluster: String,
    pub mode: String,
    pub skip_crds: bool,
    pub dry_run: bool,
    pub silent: bool,
    pub debug: bool,
    pub non_interactive: bool,
    pub set: Vec<String>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub app_chart: Option<PathBuf>,
    pub app_values: Option<PathBuf>,
    pub app_namespace: String,
    pub app_timeout: Option<String>,
}

/// Run the install command
pub async fn run(args: InstallArgs, cancel: &CancellationToken) -> Result<()> {
    let request = build_request(args)?;

    let (target, backends) = resolve_backends(&request, cancel).await.map_err(|e| {
        if e.is_cancelled() {
            CliError::Cancelled
        } else {
            CliError::Install {
                message: e.to_string(),
                help: Some(format!(
                    "bosun needs either a kubeconfig context named '{}' or kubectl on PATH",
                    request.kube_context()
                )),
            }
        }
    })?;

    display::print_start(&request.cluster, target, request.dry_run, request.silent);

    let silent = request.silent;
    let outcome = Installer::new(request, backends).install(cancel).await;
    display::print_outcome(&outcome, silent);

    if outcome.success {
        Ok(())
    } else if outcome.cancelled {
        Err(CliError::Cancelled)
    } else {
        Err(failure_error(&outcome))
    }
}

/// Map a failed outcome onto the CLI error that carries its exit code
///
/// Keyed on the error classification rather than the phase: the
/// connectivity phase also checks for the helm binary, and a missing
/// tool is not a connectivity problem.
fn failure_error(outcome: &InstallOutcome) -> CliError {
    match outcome.error_kind {
        Some(ErrorKind::Connectivity) => CliError::Connectivity {
            message: outcome.summary(),
            help: Some("check that the cluster is running and the kubeconfig context exists".to_string()),
        },
        Some(ErrorKind::ReadinessTimeout) => CliError::ReadinessTimeout {
            message: outcome.summary(),
        },
        _ => CliError::Install {
            message: outcome.summary(),
            help: None,
        },
    }
}

/// Turn the raw flags into a validated request
fn build_request(args: InstallArgs) -> Result<InstallRequest> {
    let mode = args
        .mode
        .parse()
        .map_err(|e: bosun_core::InstallError| CliError::usage(e.to_string()))?;

    let mut request = InstallRequest::for_cluster(args.cluster);
    request.mode = mode;
    request.skip_crds = args.skip_crds;
    request.dry_run = args.dry_run;
    request.silent = args.silent;
    request.debug = args.debug;
    request.non_interactive = args.non_interactive;

    if !args.set.is_empty() {
        let mut controller = ControllerConfig::default();
        for entry in &args.set {
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                CliError::usage(format!("--set '{}' is not of the form key=value", entry))
            })?;
            controller
                .values
                .insert(key.to_string(), value.to_string());
        }
        request.controller = Some(controller);
    }

    if let (Some(cert), Some(key)) = (args.tls_cert, args.tls_key) {
        request.tls = Some(TlsFiles { cert, key });
    }

    if let Some(chart) = args.app_chart {
        request.app_of_apps = Some(AppOfAppsConfig {
            chart_path: chart.to_string_lossy().into_owned(),
            values_file: args.app_values,
            namespace: args.app_namespace,
            timeout: args.app_timeout,
        });
    }

    request
        .validate()
        .map_err(|e| CliError::usage(e.to_string()))?;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> InstallArgs {
        InstallArgs {
            cluster: "demo".to_string(),
            mode: "tenant-oss".to_string(),
            skip_crds: false,
            dry_run: false,
            silent: false,
            debug: false,
            non_interactive: false,
            set: vec![],
            tls_cert: None,
            tls_key: None,
            app_chart: None,
            app_values: None,
            app_namespace: "argocd".to_string(),
            app_timeout: None,
        }
    }

    #[test]
    fn test_build_request_defaults() {
        let request = build_request(base_args()).unwrap();
        assert_eq!(request.cluster, "demo");
        assert_eq!(request.kube_context(), "k3d-demo");
        assert!(request.app_of_apps.is_none());
        assert!(request.controller.is_none());
    }

    #[test]
    fn test_build_request_rejects_unknown_mode() {
        let mut args = base_args();
        args.mode = "multi-cloud".to_string();
        assert!(matches!(
            build_request(args),
            Err(CliError::Usage { .. })
        ));
    }

    #[test]
    fn test_build_request_parses_set_overrides() {
        let mut args = base_args();
        args.set = vec!["server.replicas=2".to_string()];
        let request = build_request(args).unwrap();
        let controller = request.controller.unwrap();
        assert_eq!(controller.values.get("server.replicas").unwrap(), "2");
    }

    #[test]
    fn test_build_request_rejects_malformed_set() {
        let mut args = base_args();
        args.set = vec!["server.replicas".to_string()];
        assert!(build_request(args).is_err());
    }

    #[test]
    fn test_build_request_app_of_apps() {
        let mut args = base_args();
        args.app_chart = Some(PathBuf::from("./apps"));
        args.app_timeout = Some("5m".to_string());
        let request = build_request(args).unwrap();
        let apps = request.app_of_apps.unwrap();
        assert_eq!(apps.chart_path, "./apps");
        assert_eq!(apps.timeout.as_deref(), Some("5m"));
    }

    #[test]
    fn test_failure_error_distinguishes_causes() {
        use bosun_core::{InstallError, Phase};

        let connectivity = InstallOutcome::failed(
            Phase::ConnectivityCheck,
            &InstallError::ConnectivityFailure {
                attempts: 3,
                last: "connection refused".to_string(),
            },
            None,
        );
        assert!(matches!(
            failure_error(&connectivity),
            CliError::Connectivity { .. }
        ));

        // The same phase also probes for the helm binary; a missing tool
        // must not read as a connectivity failure.
        let no_helm = InstallOutcome::failed(
            Phase::ConnectivityCheck,
            &InstallError::ToolUnavailable {
                tool: "helm".to_string(),
            },
            None,
        );
        assert!(matches!(failure_error(&no_helm), CliError::Install { .. }));

        let timeout = InstallOutcome::failed(
            Phase::WorkloadsReady,
            &InstallError::ReadinessTimeout {
                elapsed: std::time::Duration::from_secs(300),
                missing: vec![],
            },
            None,
        );
        assert!(matches!(
            failure_error(&timeout),
            CliError::ReadinessTimeout { .. }
        ));

        let verify = InstallOutcome::failed(
            Phase::ControllerReleaseVerify,
            &InstallError::ReleaseVerificationFailure {
                release: "argocd".to_string(),
                namespace: "argocd".to_string(),
            },
            None,
        );
        assert!(matches!(failure_error(&verify), CliError::Install { .. }));
    }

    #[test]
    fn test_build_request_rejects_bad_app_timeout() {
        let mut args = base_args();
        args.app_chart = Some(PathBuf::from("./apps"));
        args.app_timeout = Some("soon".to_string());
        assert!(build_request(args).is_err());
    }
}
