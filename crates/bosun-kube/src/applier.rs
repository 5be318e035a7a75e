//! Applying manifests to the cluster
//!
//! Two appliers share one contract: take a manifest source, land every
//! document on the cluster, succeed when all of them are accepted.
//! [`Applier`] talks to the API server directly with a create-else-replace
//! strategy; [`KubectlApplier`] shells out to `kubectl apply` for clusters
//! we can only reach through a configured kubectl context.

use std::collections::HashMap;
use std::time::Duration;

use kube::{api::PostParams, Client};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use bosun_core::{config::defaults, InstallError, Result};
use bosun_exec::CommandRunner;

use crate::manifest::{parse_manifest, ManifestResource};

/// Where a manifest comes from
#[derive(Debug, Clone)]
pub enum ManifestSource {
    /// Fetch over HTTPS before applying
    Url(String),
    /// Already-in-memory YAML
    Inline(String),
}

/// Fetch a manifest body over HTTP
///
/// Non-2xx statuses are errors; the body is returned verbatim.
pub async fn fetch_manifest(http: &reqwest::Client, url: &str) -> Result<String> {
    debug!(url, "fetching manifest");
    let response = http.get(url).send().await.map_err(|e| InstallError::Http {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(InstallError::Http {
            url: url.to_string(),
            message: format!("unexpected status {}", status),
        });
    }

    response.text().await.map_err(|e| InstallError::Http {
        url: url.to_string(),
        message: format!("reading body: {}", e),
    })
}

/// Applies manifests through the Kubernetes API
pub struct Applier {
    client: Client,
    http: reqwest::Client,
}

impl Applier {
    pub fn new(client: Client) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(defaults::MANIFEST_FETCH_TIMEOUT)
            .build()
            .map_err(|e| InstallError::Internal(format!("building HTTP client: {}", e)))?;
        Ok(Self { client, http })
    }

    /// Resolve a source and apply every document in it
    ///
    /// Returns the number of resources applied. Cancellation is checked
    /// between resources; an in-flight API call is allowed to finish.
    pub async fn apply(&self, source: &ManifestSource, cancel: &CancellationToken) -> Result<usize> {
        let blob = match source {
            ManifestSource::Url(url) => fetch_manifest(&self.http, url).await?,
            ManifestSource::Inline(body) => body.clone(),
        };
        self.apply_blob(&blob, cancel).await
    }

    async fn apply_blob(&self, blob: &str, cancel: &CancellationToken) -> Result<usize> {
        let resources = parse_manifest(blob)?;

        for resource in &resources {
            if cancel.is_cancelled() {
                return Err(InstallError::Cancelled);
            }
            self.apply_resource(resource).await?;
        }

        Ok(resources.len())
    }

    /// Create the resource, falling back to replace when it already exists
    ///
    /// Replace requires the current resourceVersion, so on a 409 conflict the
    /// existing object is fetched and its version copied onto ours.
    async fn apply_resource(&self, resource: &ManifestResource) -> Result<()> {
        let api = resource.api(self.client.clone());
        let params = PostParams::default();

        match api.create(&params, &resource.obj).await {
            Ok(_) => {
                info!(resource = %resource.display_name(), "created");
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                let existing = api.get(&resource.name).await.map_err(|e| {
                    apply_failure(resource, format!("fetching existing resource: {}", e))
                })?;

                let mut replacement = resource.obj.clone();
                replacement.metadata.resource_version = existing.metadata.resource_version;

                api.replace(&resource.name, &params, &replacement)
                    .await
                    .map_err(|e| apply_failure(resource, format!("replace: {}", e)))?;
                info!(resource = %resource.display_name(), "replaced");
                Ok(())
            }
            Err(e) => Err(apply_failure(resource, format!("create: {}", e))),
        }
    }
}

fn apply_failure(resource: &ManifestResource, message: String) -> InstallError {
    InstallError::ApplyFailure {
        kind: resource.gvk.kind.clone(),
        name: resource.name.clone(),
        message,
    }
}

/// Applies manifests by shelling out to kubectl
///
/// Used when no native client can be built for the target cluster. kubectl's
/// own apply semantics stand in for create-else-replace here.
pub struct KubectlApplier {
    runner: CommandRunner,
    context: String,
}

impl KubectlApplier {
    pub fn new(runner: CommandRunner, context: impl Into<String>) -> Self {
        Self {
            runner,
            context: context.into(),
        }
    }

    /// Apply a manifest URL with `kubectl apply -f <url>`
    pub async fn apply_url(&self, url: &str, cancel: &CancellationToken) -> Result<()> {
        let args = vec![
            "apply".to_string(),
            "-f".to_string(),
            url.to_string(),
            "--context".to_string(),
            self.context.clone(),
        ];

        let result = self
            .runner
            .run(
                "kubectl",
                &args,
                &HashMap::new(),
                Duration::from_secs(60),
                cancel,
            )
            .await?;

        if !result.success() {
            return Err(InstallError::ApplyFailure {
                kind: "manifest".to_string(),
                name: url.to_string(),
                message: result.message().to_string(),
            });
        }

        info!(url, "applied via kubectl");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_http() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_manifest_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crds/application-crd.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("kind: CustomResourceDefinition"))
            .mount(&server)
            .await;

        let body = fetch_manifest(
            &test_http(),
            &format!("{}/crds/application-crd.yaml", server.uri()),
        )
        .await
        .unwrap();
        assert_eq!(body, "kind: CustomResourceDefinition");
    }

    #[tokio::test]
    async fn test_fetch_manifest_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.yaml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetch_manifest(&test_http(), &format!("{}/missing.yaml", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Http { .. }));
        assert!(err.to_string().contains("404"));
    }

    fn test_client(server: &MockServer) -> Client {
        let config = kube::Config::new(server.uri().parse().unwrap());
        Client::try_from(config).unwrap()
    }

    #[tokio::test]
    async fn test_apply_creates_new_resource() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/default/configmaps"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "demo", "namespace": "default", "resourceVersion": "1"},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let applier = Applier::new(test_client(&server)).unwrap();
        let manifest = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: demo\n  namespace: default\ndata:\n  key: value\n";
        let applied = applier
            .apply(
                &ManifestSource::Inline(manifest.to_string()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn test_apply_replaces_existing_with_live_resource_version() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/default/configmaps"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "kind": "Status",
                "apiVersion": "v1",
                "metadata": {},
                "status": "Failure",
                "message": "configmaps \"demo\" already exists",
                "reason": "AlreadyExists",
                "code": 409,
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/configmaps/demo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "demo", "namespace": "default", "resourceVersion": "42"},
                "data": {"key": "old"},
            })))
            .mount(&server)
            .await;

        // The replace only matches when it carries the live object's
        // resourceVersion, so a second apply converges instead of being
        // rejected with a conflict.
        Mock::given(method("PUT"))
            .and(path("/api/v1/namespaces/default/configmaps/demo"))
            .and(body_partial_json(json!({
                "metadata": {"resourceVersion": "42"},
                "data": {"key": "new"},
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "demo", "namespace": "default", "resourceVersion": "43"},
                "data": {"key": "new"},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let applier = Applier::new(test_client(&server)).unwrap();
        let manifest = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: demo\n  namespace: default\ndata:\n  key: new\n";
        let applied = applier
            .apply(
                &ManifestSource::Inline(manifest.to_string()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn test_fetch_manifest_connection_refused() {
        // Port 1 is virtually never listening.
        let err = fetch_manifest(&test_http(), "http://127.0.0.1:1/x.yaml")
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Http { .. }));
    }
}
