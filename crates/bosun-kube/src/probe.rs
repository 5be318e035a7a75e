//! Cluster probing behind a backend-neutral trait
//!
//! The installer picks one probe backend per run: [`NativeProbe`] when a
//! kube client can be built for the target context, [`KubectlProbe`] when
//! the cluster is only reachable through the kubectl binary. Both answer
//! the same three questions: is the API server up, does this resource
//! exist, does this namespace exist.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, ObjectMeta, PostParams},
    Client,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use bosun_core::{InstallError, ReadinessTarget, Result, TargetCategory};
use bosun_exec::CommandRunner;

/// Per-probe subprocess timeout. A single `kubectl get` against a healthy
/// cluster takes well under a second; anything past this is a hung call.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Namespace to look in for a namespaced target. An empty namespace marks
/// a cluster-scoped target, so this only falls back for malformed input.
fn target_namespace(target: &ReadinessTarget) -> &str {
    if target.namespace.is_empty() {
        "default"
    } else {
        &target.namespace
    }
}

/// Backend-neutral view of a cluster for readiness checks
#[async_trait]
pub trait ClusterProbe: Send + Sync {
    /// Whether the target currently exists (and, for namespaces, is Active)
    async fn check(&self, target: &ReadinessTarget, cancel: &CancellationToken) -> Result<bool>;

    /// Whether the API server answers at all
    async fn ping(&self, cancel: &CancellationToken) -> Result<()>;

    /// Create the namespace if it does not already exist
    async fn ensure_namespace(&self, namespace: &str, cancel: &CancellationToken) -> Result<()>;
}

/// Probe backed by a kube client
#[derive(Clone)]
pub struct NativeProbe {
    client: Client,
}

impl NativeProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterProbe for NativeProbe {
    async fn check(&self, target: &ReadinessTarget, cancel: &CancellationToken) -> Result<bool> {
        if cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }

        match target.category {
            TargetCategory::Crd => {
                let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
                Ok(api.get_opt(&target.name).await.map_err(InstallError::api)?.is_some())
            }
            TargetCategory::Namespace => {
                let api: Api<Namespace> = Api::all(self.client.clone());
                let ns = api.get_opt(&target.name).await.map_err(InstallError::api)?;
                Ok(ns
                    .and_then(|n| n.status)
                    .and_then(|s| s.phase)
                    .as_deref()
                    == Some("Active"))
            }
            TargetCategory::Deployment => {
                let api: Api<Deployment> =
                    Api::namespaced(self.client.clone(), target_namespace(target));
                Ok(api.get_opt(&target.name).await.map_err(InstallError::api)?.is_some())
            }
            TargetCategory::StatefulSet => {
                let api: Api<StatefulSet> =
                    Api::namespaced(self.client.clone(), target_namespace(target));
                Ok(api.get_opt(&target.name).await.map_err(InstallError::api)?.is_some())
            }
        }
    }

    async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }
        let version = self
            .client
            .apiserver_version()
            .await
            .map_err(InstallError::api)?;
        debug!(version = %version.git_version, "API server reachable");
        Ok(())
    }

    async fn ensure_namespace(&self, namespace: &str, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api
            .get_opt(namespace)
            .await
            .map_err(InstallError::api)?
            .is_some()
        {
            debug!(namespace, "namespace already exists");
            return Ok(());
        }

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                info!(namespace, "namespace created");
                Ok(())
            }
            // Lost the race to someone else creating it; that is fine.
            Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
            Err(e) => Err(InstallError::api(e)),
        }
    }
}

/// Probe backed by the kubectl binary
pub struct KubectlProbe {
    runner: CommandRunner,
    context: String,
}

impl KubectlProbe {
    pub fn new(runner: CommandRunner, context: impl Into<String>) -> Self {
        Self {
            runner,
            context: context.into(),
        }
    }

    /// kubectl resource type argument for a target category
    fn kind_arg(category: TargetCategory) -> &'static str {
        match category {
            TargetCategory::Crd => "crd",
            TargetCategory::Namespace => "namespace",
            TargetCategory::Deployment => "deployment",
            TargetCategory::StatefulSet => "statefulset",
        }
    }

    async fn run_kubectl(
        &self,
        args: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<bosun_core::CommandResult> {
        self.runner
            .run("kubectl", &args, &HashMap::new(), PROBE_TIMEOUT, cancel)
            .await
    }
}

#[async_trait]
impl ClusterProbe for KubectlProbe {
    async fn check(&self, target: &ReadinessTarget, cancel: &CancellationToken) -> Result<bool> {
        let mut args = vec![
            "get".to_string(),
            Self::kind_arg(target.category).to_string(),
            target.name.clone(),
        ];
        if !target.namespace.is_empty() {
            args.push("-n".to_string());
            args.push(target.namespace.clone());
        }
        args.push("--context".to_string());
        args.push(self.context.clone());
        args.push("-o".to_string());
        // A namespace can exist in Terminating; existence alone is not
        // enough there, so ask for the phase instead of the name.
        if target.category == TargetCategory::Namespace {
            args.push("jsonpath={.status.phase}".to_string());
        } else {
            args.push("name".to_string());
        }

        let result = self.run_kubectl(args, cancel).await?;
        if result.success() {
            if target.category == TargetCategory::Namespace {
                return Ok(result.stdout.trim() == "Active");
            }
            return Ok(true);
        }
        // kubectl exits 1 both for "not found" and for real failures;
        // only the former counts as a clean negative.
        let stderr = result.stderr.to_lowercase();
        if stderr.contains("notfound") || stderr.contains("not found") {
            return Ok(false);
        }
        Err(InstallError::Api(format!(
            "kubectl get {} {}: {}",
            Self::kind_arg(target.category),
            target.name,
            result.message()
        )))
    }

    async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        let args = vec![
            "version".to_string(),
            "--context".to_string(),
            self.context.clone(),
            "-o".to_string(),
            "json".to_string(),
        ];
        let result = self.run_kubectl(args, cancel).await?;
        if result.success() {
            Ok(())
        } else {
            Err(InstallError::Api(format!(
                "kubectl version: {}",
                result.message()
            )))
        }
    }

    async fn ensure_namespace(&self, namespace: &str, cancel: &CancellationToken) -> Result<()> {
        let args = vec![
            "create".to_string(),
            "namespace".to_string(),
            namespace.to_string(),
            "--context".to_string(),
            self.context.clone(),
        ];
        let result = self.run_kubectl(args, cancel).await?;
        if result.success() {
            info!(namespace, "namespace created");
            return Ok(());
        }
        if result.stderr.to_lowercase().contains("already exists") {
            debug!(namespace, "namespace already exists");
            return Ok(());
        }
        Err(InstallError::Api(format!(
            "kubectl create namespace {}: {}",
            namespace,
            result.message()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_namespace_fallback() {
        let dep = ReadinessTarget::namespaced(TargetCategory::Deployment, "argocd-server", "argocd");
        assert_eq!(target_namespace(&dep), "argocd");

        let bare = ReadinessTarget::cluster_scoped(TargetCategory::Deployment, "argocd-server");
        assert_eq!(target_namespace(&bare), "default");
    }

    /// Put a fake kubectl on PATH that reports namespace phases by name:
    /// `live` is Active, `dying` is Terminating, anything else is missing.
    #[cfg(unix)]
    fn fake_kubectl() -> tempfile::TempDir {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubectl");
        std::fs::write(
            &path,
            "#!/bin/sh\n\
             case \"$3\" in\n\
               live) printf 'Active' ;;\n\
               dying) printf 'Terminating' ;;\n\
               *) echo 'Error from server (NotFound): namespaces not found' >&2; exit 1 ;;\n\
             esac\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let current = std::env::var("PATH").unwrap_or_default();
        std::env::set_var("PATH", format!("{}:{}", dir.path().display(), current));
        dir
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kubectl_namespace_check_requires_active_phase() {
        let _bin = fake_kubectl();
        let probe = KubectlProbe::new(CommandRunner::new(), "k3d-demo");
        let cancel = CancellationToken::new();

        let active = ReadinessTarget::cluster_scoped(TargetCategory::Namespace, "live");
        assert!(probe.check(&active, &cancel).await.unwrap());

        let terminating = ReadinessTarget::cluster_scoped(TargetCategory::Namespace, "dying");
        assert!(!probe.check(&terminating, &cancel).await.unwrap());

        let missing = ReadinessTarget::cluster_scoped(TargetCategory::Namespace, "gone");
        assert!(!probe.check(&missing, &cancel).await.unwrap());
    }

    #[test]
    fn test_kind_arg_mapping() {
        assert_eq!(KubectlProbe::kind_arg(TargetCategory::Crd), "crd");
        assert_eq!(KubectlProbe::kind_arg(TargetCategory::Namespace), "namespace");
        assert_eq!(KubectlProbe::kind_arg(TargetCategory::Deployment), "deployment");
        assert_eq!(
            KubectlProbe::kind_arg(TargetCategory::StatefulSet),
            "statefulset"
        );
    }
}
