//! Manifest parsing and endpoint resolution
//!
//! Parses multi-document YAML manifests into [`DynamicObject`]s and resolves
//! each resource's API endpoint from a static kind table rather than live
//! discovery, so CRD manifests can be applied before discovery would know
//! about the types they define.

use kube::{
    api::{Api, DynamicObject},
    core::{GroupVersionKind, TypeMeta},
    discovery::ApiResource,
    Client,
};

use bosun_core::{InstallError, Result};

/// A single parsed resource from a manifest, ready for apply
#[derive(Debug, Clone)]
pub struct ManifestResource {
    /// Group-Version-Kind of the resource
    pub gvk: GroupVersionKind,
    /// Resource name from metadata
    pub name: String,
    /// Namespace, if the resource carries one
    pub namespace: Option<String>,
    /// The dynamic object to send to the API
    pub obj: DynamicObject,
}

impl ManifestResource {
    /// Display name for logging, e.g. `customresourcedefinition/applications.argoproj.io`
    pub fn display_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}/{}", ns, self.gvk.kind.to_lowercase(), self.name),
            None => format!("{}/{}", self.gvk.kind.to_lowercase(), self.name),
        }
    }

    /// Build a dynamic Api for this resource, namespaced when it carries one
    pub fn api(&self, client: Client) -> Api<DynamicObject> {
        let ar = endpoint_for(&self.gvk);
        match &self.namespace {
            Some(ns) if !is_cluster_scoped(&self.gvk.kind) => {
                Api::namespaced_with(client, ns, &ar)
            }
            _ => Api::all_with(client, &ar),
        }
    }
}

/// Parse a multi-document YAML manifest into resources
///
/// Documents are separated by `---`. Empty and comment-only documents are
/// skipped. Every remaining document must carry apiVersion, kind, and
/// metadata.name.
pub fn parse_manifest(blob: &str) -> Result<Vec<ManifestResource>> {
    let mut resources = Vec::new();

    for (index, doc) in blob.split("---").enumerate() {
        let doc = doc.trim();
        if doc.is_empty() {
            continue;
        }
        if doc
            .lines()
            .all(|l| l.trim().is_empty() || l.trim().starts_with('#'))
        {
            continue;
        }

        let resource = parse_document(doc).map_err(|e| {
            InstallError::Manifest(format!("failed to parse document {}: {}", index, e))
        })?;
        resources.push(resource);
    }

    Ok(resources)
}

fn parse_document(doc: &str) -> Result<ManifestResource> {
    let obj: DynamicObject = serde_yaml::from_str(doc)
        .map_err(|e| InstallError::Manifest(format!("YAML parse error: {}", e)))?;

    let type_meta = obj
        .types
        .as_ref()
        .ok_or_else(|| InstallError::Manifest("resource missing apiVersion or kind".to_string()))?;
    let gvk = gvk_from_type_meta(type_meta);

    let name = obj
        .metadata
        .name
        .clone()
        .ok_or_else(|| InstallError::Manifest("resource missing metadata.name".to_string()))?;

    Ok(ManifestResource {
        namespace: obj.metadata.namespace.clone(),
        gvk,
        name,
        obj,
    })
}

/// Convert TypeMeta to GroupVersionKind
///
/// - "apps/v1" -> group="apps", version="v1"
/// - "v1" -> group="", version="v1" (core API)
pub fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}

/// Resolve the API endpoint for a GVK from the static kind table
///
/// Falls back to `lowercase(kind) + "s"` for kinds outside the table. That
/// heuristic is wrong for irregular plurals (e.g. Endpoints, Ingress) but
/// covers every kind the bootstrap manifests actually contain; unknown kinds
/// surface as a 404 from the API server rather than a local error.
pub fn endpoint_for(gvk: &GroupVersionKind) -> ApiResource {
    let plural = match gvk.kind.as_str() {
        "CustomResourceDefinition" => "customresourcedefinitions".to_string(),
        "Namespace" => "namespaces".to_string(),
        "Deployment" => "deployments".to_string(),
        "StatefulSet" => "statefulsets".to_string(),
        "DaemonSet" => "daemonsets".to_string(),
        "Service" => "services".to_string(),
        "ServiceAccount" => "serviceaccounts".to_string(),
        "ConfigMap" => "configmaps".to_string(),
        "Secret" => "secrets".to_string(),
        "Role" => "roles".to_string(),
        "RoleBinding" => "rolebindings".to_string(),
        "ClusterRole" => "clusterroles".to_string(),
        "ClusterRoleBinding" => "clusterrolebindings".to_string(),
        "NetworkPolicy" => "networkpolicies".to_string(),
        "Ingress" => "ingresses".to_string(),
        other => format!("{}s", other.to_lowercase()),
    };

    ApiResource::from_gvk_with_plural(gvk, &plural)
}

/// Whether a kind is cluster-scoped
pub fn is_cluster_scoped(kind: &str) -> bool {
    matches!(
        kind,
        "CustomResourceDefinition" | "Namespace" | "ClusterRole" | "ClusterRoleBinding"
    )
}
