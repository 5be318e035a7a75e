//! Failure diagnostics
//!
//! When a release install fails or workloads never come up, bosun captures
//! a snapshot of the namespace before surfacing the error: pod table,
//! recent events, and logs from pods that are not cleanly running. The
//! snapshot is best-effort by design - a collector never fails, it just
//! writes what it could not gather into the report itself.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::{
    api::{Api, ListParams, LogParams},
    Client,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use bosun_exec::CommandRunner;

/// How many of the most recent events make the report
const EVENT_LIMIT: usize = 20;
/// Log tail length per container
const LOG_TAIL_LINES: i64 = 50;
/// Bound on each kubectl invocation during collection
const COLLECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A collected snapshot, rendered section by section
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsReport {
    sections: Vec<(String, String)>,
}

impl DiagnosticsReport {
    pub fn push(&mut self, title: impl Into<String>, body: impl Into<String>) {
        self.sections.push((title.into(), body.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Render the whole report as indented plain text
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (title, body) in &self.sections {
            let _ = writeln!(out, "=== {} ===", title);
            let body = body.trim_end();
            if body.is_empty() {
                let _ = writeln!(out, "  (none)");
            } else {
                for line in body.lines() {
                    let _ = writeln!(out, "  {}", line);
                }
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

/// Gathers a namespace snapshot for failure reports
#[async_trait]
pub trait DiagnosticsCollector: Send + Sync {
    /// Collect whatever can be collected; never fails
    async fn collect(&self, namespace: &str, cancel: &CancellationToken) -> DiagnosticsReport;
}

/// Collector backed by a kube client
pub struct NativeDiagnostics {
    client: Client,
}

impl NativeDiagnostics {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn pod_section(&self, namespace: &str) -> (String, Vec<Pod>) {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = match api.list(&ListParams::default()).await {
            Ok(list) => list.items,
            Err(e) => return (format!("failed to list pods: {}", e), Vec::new()),
        };

        if pods.is_empty() {
            return ("no pods in namespace".to_string(), pods);
        }

        let mut body = String::new();
        let _ = writeln!(body, "{:<52} {:<12} {:<8} RESTARTS", "NAME", "PHASE", "READY");
        for pod in &pods {
            let name = pod.metadata.name.as_deref().unwrap_or("<unnamed>");
            let phase = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .unwrap_or("Unknown");
            let (ready, total, restarts) = container_counts(pod);
            let _ = writeln!(
                body,
                "{:<52} {:<12} {:<8} {}",
                name,
                phase,
                format!("{}/{}", ready, total),
                restarts
            );
        }
        (body, pods)
    }

    async fn event_section(&self, namespace: &str) -> String {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let mut events = match api.list(&ListParams::default()).await {
            Ok(list) => list.items,
            Err(e) => return format!("failed to list events: {}", e),
        };

        events.sort_by(|a, b| a.last_timestamp.cmp(&b.last_timestamp));
        let recent = events.iter().rev().take(EVENT_LIMIT).collect::<Vec<_>>();

        let mut body = String::new();
        for event in recent.iter().rev() {
            let kind = event
                .involved_object
                .kind
                .as_deref()
                .unwrap_or("?");
            let name = event.involved_object.name.as_deref().unwrap_or("?");
            let _ = writeln!(
                body,
                "[{}] {} {}/{}: {}",
                event.type_.as_deref().unwrap_or("Normal"),
                event.reason.as_deref().unwrap_or("-"),
                kind.to_lowercase(),
                name,
                event.message.as_deref().unwrap_or("").trim()
            );
        }
        body
    }

    async fn log_sections(&self, namespace: &str, pods: &[Pod], report: &mut DiagnosticsReport) {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        for pod in pods.iter().filter(|p| is_troubled(p)) {
            let pod_name = match pod.metadata.name.as_deref() {
                Some(n) => n,
                None => continue,
            };
            report.push(format!("state {}", pod_name), pod_state(pod));
            let statuses = pod
                .status
                .as_ref()
                .and_then(|s| s.container_statuses.as_ref())
                .map(|v| v.as_slice())
                .unwrap_or(&[]);

            for status in statuses {
                let params = LogParams {
                    container: Some(status.name.clone()),
                    tail_lines: Some(LOG_TAIL_LINES),
                    ..Default::default()
                };
                let body = match api.logs(pod_name, &params).await {
                    Ok(logs) => logs,
                    Err(e) => format!("failed to fetch logs: {}", e),
                };
                report.push(format!("logs {}/{}", pod_name, status.name), body);

                // A restarted container's story is usually in the previous
                // instance's output.
                if status.restart_count > 0 {
                    let params = LogParams {
                        container: Some(status.name.clone()),
                        tail_lines: Some(LOG_TAIL_LINES),
                        previous: true,
                        ..Default::default()
                    };
                    let body = match api.logs(pod_name, &params).await {
                        Ok(logs) => logs,
                        Err(e) => format!("failed to fetch previous logs: {}", e),
                    };
                    report.push(
                        format!("previous logs {}/{}", pod_name, status.name),
                        body,
                    );
                }
            }
        }
    }
}

#[async_trait]
impl DiagnosticsCollector for NativeDiagnostics {
    async fn collect(&self, namespace: &str, cancel: &CancellationToken) -> DiagnosticsReport {
        let mut report = DiagnosticsReport::default();
        if cancel.is_cancelled() {
            return report;
        }
        debug!(namespace, "collecting diagnostics");

        let (pod_body, pods) = self.pod_section(namespace).await;
        report.push(format!("pods in {}", namespace), pod_body);

        if cancel.is_cancelled() {
            return report;
        }
        report.push("recent events".to_string(), self.event_section(namespace).await);

        if cancel.is_cancelled() {
            return report;
        }
        self.log_sections(namespace, &pods, &mut report).await;

        report
    }
}

/// Collector backed by the kubectl binary
pub struct KubectlDiagnostics {
    runner: CommandRunner,
    context: String,
}

impl KubectlDiagnostics {
    pub fn new(runner: CommandRunner, context: impl Into<String>) -> Self {
        Self {
            runner,
            context: context.into(),
        }
    }

    async fn capture(&self, args: &[&str], cancel: &CancellationToken) -> String {
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string())
            .chain(["--context".to_string(), self.context.clone()])
            .collect();
        match self
            .runner
            .run("kubectl", &args, &HashMap::new(), COLLECT_TIMEOUT, cancel)
            .await
        {
            Ok(result) if result.success() => result.stdout,
            Ok(result) => format!("kubectl failed: {}", result.message()),
            Err(e) => format!("kubectl failed: {}", e),
        }
    }
}

#[async_trait]
impl DiagnosticsCollector for KubectlDiagnostics {
    async fn collect(&self, namespace: &str, cancel: &CancellationToken) -> DiagnosticsReport {
        let mut report = DiagnosticsReport::default();
        if cancel.is_cancelled() {
            return report;
        }
        debug!(namespace, "collecting diagnostics via kubectl");

        report.push(
            format!("pods in {}", namespace),
            self.capture(&["get", "pods", "-n", namespace, "-o", "wide"], cancel)
                .await,
        );
        if cancel.is_cancelled() {
            return report;
        }
        report.push(
            "recent events".to_string(),
            self.capture(
                &[
                    "get",
                    "events",
                    "-n",
                    namespace,
                    "--sort-by=.lastTimestamp",
                ],
                cancel,
            )
            .await,
        );
        if cancel.is_cancelled() {
            return report;
        }
        report.push(
            format!("pod descriptions in {}", namespace),
            self.capture(&["describe", "pods", "-n", namespace], cancel).await,
        );

        report
    }
}

/// Ready/total container counts and the restart sum for a pod
fn container_counts(pod: &Pod) -> (usize, usize, i32) {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|v| v.as_slice())
        .unwrap_or(&[]);
    let ready = statuses.iter().filter(|s| s.ready).count();
    let restarts = statuses.iter().map(|s| s.restart_count).sum();
    (ready, statuses.len(), restarts)
}

/// Per-container state and pod conditions for a troubled pod, in the
/// shape of the interesting parts of `kubectl describe`
fn pod_state(pod: &Pod) -> String {
    let mut body = String::new();
    let status = match pod.status.as_ref() {
        Some(s) => s,
        None => return "no status reported".to_string(),
    };

    let statuses = status
        .container_statuses
        .as_deref()
        .unwrap_or(&[]);
    for cs in statuses {
        let state = cs
            .state
            .as_ref()
            .map(describe_container_state)
            .unwrap_or_else(|| "Unknown".to_string());
        let _ = writeln!(body, "container {}: {}", cs.name, state);
        if let Some(last) = cs.last_state.as_ref() {
            let last = describe_container_state(last);
            if last != "Unknown" {
                let _ = writeln!(body, "  last state: {}", last);
            }
        }
    }

    for condition in status.conditions.as_deref().unwrap_or(&[]) {
        let _ = write!(
            body,
            "condition {}={}",
            condition.type_, condition.status
        );
        match (condition.reason.as_deref(), condition.message.as_deref()) {
            (Some(reason), Some(message)) => {
                let _ = writeln!(body, " ({}: {})", reason, message.trim());
            }
            (Some(reason), None) => {
                let _ = writeln!(body, " ({})", reason);
            }
            _ => {
                body.push('\n');
            }
        }
    }
    body
}

fn describe_container_state(state: &k8s_openapi::api::core::v1::ContainerState) -> String {
    if state.running.is_some() {
        return "Running".to_string();
    }
    if let Some(waiting) = state.waiting.as_ref() {
        let reason = waiting.reason.as_deref().unwrap_or("Waiting");
        return match waiting.message.as_deref() {
            Some(message) => format!("Waiting ({}: {})", reason, message.trim()),
            None => format!("Waiting ({})", reason),
        };
    }
    if let Some(terminated) = state.terminated.as_ref() {
        let reason = terminated.reason.as_deref().unwrap_or("Terminated");
        return format!(
            "Terminated ({}, exit code {})",
            reason, terminated.exit_code
        );
    }
    "Unknown".to_string()
}

/// Whether a pod deserves a log capture
fn is_troubled(pod: &Pod) -> bool {
    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown");
    if phase != "Running" && phase != "Succeeded" {
        return true;
    }
    let (ready, total, restarts) = container_counts(pod);
    ready < total || restarts > 0
}
