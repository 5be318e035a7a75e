//! Release install and verification
//!
//! One release, one `helm upgrade --install` invocation. The argument
//! surface here is deliberately fixed and fully covered by tests, because
//! helm's flag parsing is the real interface of this crate. Verification
//! goes through `helm list -o json` so a zero exit code from helm that
//! quietly did nothing still gets caught.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use bosun_core::{config::defaults, InstallError, Result};
use bosun_exec::{CommandRunner, PathTranslator};

/// Grace added to the subprocess wait beyond helm's own `--timeout`, so
/// helm gets to print its error before we give up on the process.
const SUBPROCESS_GRACE: Duration = Duration::from_secs(60);

/// Everything that shapes one `helm upgrade --install` invocation
#[derive(Debug, Clone)]
pub struct ReleaseSpec {
    pub release: String,
    pub chart: String,
    /// Pinned chart version; None for local chart paths.
    pub version: Option<String>,
    pub namespace: String,
    /// Passed verbatim to `--timeout`, e.g. "10m0s".
    pub timeout: String,
    /// Values files in merge order.
    pub values_files: Vec<PathBuf>,
    /// `--set key=value` overrides.
    pub set_overrides: Vec<String>,
    /// `--set-file key=path` overrides (TLS material and the like).
    pub set_file_overrides: Vec<(String, PathBuf)>,
    /// Adds `--set crds.install=false`; CRDs are applied out of band.
    pub skip_chart_crds: bool,
    pub dry_run: bool,
}

impl ReleaseSpec {
    pub fn new(
        release: impl Into<String>,
        chart: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            release: release.into(),
            chart: chart.into(),
            version: None,
            namespace: namespace.into(),
            timeout: defaults::HELM_TIMEOUT.to_string(),
            values_files: Vec::new(),
            set_overrides: Vec::new(),
            set_file_overrides: Vec::new(),
            skip_chart_crds: false,
            dry_run: false,
        }
    }

    /// Subprocess wait bound: helm's own timeout plus grace. Falls back to
    /// the default when the string is unparseable, which validation upstream
    /// should have prevented.
    fn wait_bound(&self) -> Duration {
        humantime::parse_duration(&self.timeout)
            .unwrap_or(Duration::from_secs(600))
            + SUBPROCESS_GRACE
    }
}

/// One row of `helm list -o json` output
#[derive(Debug, Deserialize)]
struct ReleaseEntry {
    name: String,
    status: String,
}

/// Drives the helm binary for release installs
pub struct HelmInstaller {
    runner: CommandRunner,
    translator: PathTranslator,
    kube_context: String,
    env: HashMap<String, String>,
}

impl HelmInstaller {
    pub fn new(runner: CommandRunner, translator: PathTranslator, kube_context: impl Into<String>) -> Self {
        Self {
            runner,
            translator,
            kube_context: kube_context.into(),
            env: HashMap::new(),
        }
    }

    /// Point helm's cache/config/data homes at a private directory so runs
    /// never fight over the operator's own helm state.
    pub fn with_isolated_state(mut self, scratch: &Path) -> Self {
        self.env = helm_env(scratch);
        self
    }

    /// Confirm the helm binary is on PATH and answers
    pub async fn ensure_available(&self, cancel: &CancellationToken) -> Result<()> {
        self.runner
            .ensure_tool("helm", &["version", "--short"], cancel)
            .await
    }

    /// Register the chart repository and refresh its index
    ///
    /// `repo add` failing because the repo is already registered is not an
    /// error; any other failure is.
    pub async fn ensure_repo(
        &self,
        name: &str,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let add_args = vec![
            "repo".to_string(),
            "add".to_string(),
            name.to_string(),
            url.to_string(),
        ];
        let result = self
            .runner
            .run("helm", &add_args, &self.env, Duration::from_secs(60), cancel)
            .await?;
        if !result.success() && !result.stderr.contains("already exists") {
            return Err(InstallError::CommandFailed {
                program: "helm".to_string(),
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }

        let update_args = vec!["repo".to_string(), "update".to_string()];
        self.runner
            .run_checked("helm", &update_args, &self.env, Duration::from_secs(120), cancel)
            .await?;
        debug!(name, url, "chart repo ready");
        Ok(())
    }

    /// Install or upgrade a release and wait for helm to report it up
    ///
    /// Failure surfaces as [`InstallError::ReleaseFailed`] with helm's
    /// stderr as the message; the diagnostics slot is left for the caller
    /// to fill, since what to snapshot is an orchestration decision.
    pub async fn install_or_upgrade(
        &self,
        spec: &ReleaseSpec,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut translated_values = Vec::with_capacity(spec.values_files.len());
        for path in &spec.values_files {
            translated_values.push(self.translator.translate(path, cancel).await?);
        }
        let mut translated_set_files = Vec::with_capacity(spec.set_file_overrides.len());
        for (key, path) in &spec.set_file_overrides {
            translated_set_files.push((key.clone(), self.translator.translate(path, cancel).await?));
        }

        let args = upgrade_args(spec, &self.kube_context, &translated_values, &translated_set_files);
        info!(release = %spec.release, chart = %spec.chart, dry_run = spec.dry_run, "installing release");

        let result = self
            .runner
            .run("helm", &args, &self.env, spec.wait_bound(), cancel)
            .await?;

        if !result.success() {
            return Err(InstallError::ReleaseFailed {
                release: spec.release.clone(),
                message: result.message().to_string(),
                diagnostics: None,
            });
        }

        info!(release = %spec.release, "release installed");
        Ok(())
    }

    /// Whether the release shows up as deployed in helm's own listing
    pub async fn release_exists(
        &self,
        release: &str,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let args = vec![
            "list".to_string(),
            "-n".to_string(),
            namespace.to_string(),
            "-o".to_string(),
            "json".to_string(),
            "--kube-context".to_string(),
            self.kube_context.clone(),
        ];
        let result = self
            .runner
            .run_checked("helm", &args, &self.env, Duration::from_secs(60), cancel)
            .await?;
        parse_release_list(&result.stdout, release)
    }
}

/// Build the full `helm upgrade --install` argument list
///
/// Kept as a pure function so the exact flag surface is testable without a
/// helm binary. Values and set-file paths arrive pre-translated.
fn upgrade_args(
    spec: &ReleaseSpec,
    kube_context: &str,
    values_files: &[String],
    set_files: &[(String, String)],
) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        spec.release.clone(),
        spec.chart.clone(),
    ];
    if let Some(version) = &spec.version {
        args.push(format!("--version={}", version));
    }
    args.push("--namespace".to_string());
    args.push(spec.namespace.clone());
    args.push("--create-namespace".to_string());
    args.push("--wait".to_string());
    args.push("--timeout".to_string());
    args.push(spec.timeout.clone());
    for path in values_files {
        args.push("-f".to_string());
        args.push(path.clone());
    }
    for set in &spec.set_overrides {
        args.push("--set".to_string());
        args.push(set.clone());
    }
    for (key, path) in set_files {
        args.push("--set-file".to_string());
        args.push(format!("{}={}", key, path));
    }
    if spec.skip_chart_crds {
        args.push("--set".to_string());
        args.push("crds.install=false".to_string());
    }
    args.push("--kube-context".to_string());
    args.push(kube_context.to_string());
    if spec.dry_run {
        args.push("--dry-run".to_string());
    }
    args
}

/// Parse `helm list -o json` output and look for a deployed release
fn parse_release_list(json: &str, release: &str) -> Result<bool> {
    let entries: Vec<ReleaseEntry> = serde_json::from_str(json.trim())
        .map_err(|e| InstallError::Internal(format!("parsing helm list output: {}", e)))?;
    Ok(entries
        .iter()
        .any(|e| e.name == release && e.status == "deployed"))
}

/// Helm state directories under a private scratch root
fn helm_env(scratch: &Path) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert(
        "HELM_CACHE_HOME".to_string(),
        scratch.join("cache").to_string_lossy().into_owned(),
    );
    env.insert(
        "HELM_CONFIG_HOME".to_string(),
        scratch.join("config").to_string_lossy().into_owned(),
    );
    env.insert(
        "HELM_DATA_HOME".to_string(),
        scratch.join("data").to_string_lossy().into_owned(),
    );
    env
}
