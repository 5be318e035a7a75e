//! Controller values rendering
//!
//! Builds the values document handed to the controller release. A base
//! document is adjusted per deployment mode, then flat dotted-path
//! overrides from the request are merged on top, overrides winning.

use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tracing::debug;

use bosun_core::{config::DeploymentMode, InstallError, InstallRequest, Result};

/// Render the controller values document as YAML
pub fn render_controller_values(request: &InstallRequest) -> Result<String> {
    let mut values = base_values(request.mode);

    if let Some(controller) = &request.controller {
        for (path, raw) in &controller.values {
            set_dotted(&mut values, path, parse_scalar(raw));
        }
    }

    serde_yaml::to_string(&values)
        .map_err(|e| InstallError::Internal(format!("rendering values: {}", e)))
}

fn base_values(mode: DeploymentMode) -> Value {
    match mode {
        // Single-tenant on operator hardware: one replica of everything,
        // no TLS termination at the server (the ingress in front owns it).
        DeploymentMode::TenantOss => json!({
            "controller": { "replicas": 1 },
            "server": {
                "replicas": 1,
                "extraArgs": ["--insecure"],
            },
            "repoServer": { "replicas": 1 },
            "applicationSet": { "enabled": true },
            "dex": { "enabled": false },
        }),
        // Single-tenant managed: same shape, SSO via dex stays on.
        DeploymentMode::TenantSaas => json!({
            "controller": { "replicas": 1 },
            "server": {
                "replicas": 1,
                "extraArgs": ["--insecure"],
            },
            "repoServer": { "replicas": 1 },
            "applicationSet": { "enabled": true },
            "dex": { "enabled": true },
        }),
        // Shared control plane: replicated server and repo-server.
        DeploymentMode::SharedSaas => json!({
            "controller": { "replicas": 1 },
            "server": {
                "replicas": 2,
                "extraArgs": ["--insecure"],
            },
            "repoServer": { "replicas": 2 },
            "applicationSet": { "enabled": true },
            "dex": { "enabled": true },
        }),
    }
}

/// Set a dotted path like `server.replicas` in a JSON object, creating
/// intermediate objects as needed. A scalar in the way is replaced.
fn set_dotted(root: &mut Value, path: &str, value: Value) {
    let mut current = root;
    let mut parts = path.split('.').peekable();

    while let Some(part) = parts.next() {
        let map = match current.as_object_mut() {
            Some(map) => map,
            None => return,
        };
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }
        let entry = map.entry(part.to_string()).or_insert_with(|| json!({}));
        if !entry.is_object() {
            *entry = json!({});
        }
        current = entry;
    }
}

/// Interpret an override string the way helm's `--set` does for the common
/// cases: booleans and integers become typed values, everything else stays
/// a string.
fn parse_scalar(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => match raw.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::from(raw),
        },
    }
}

/// Write a values document to a temp file
///
/// The returned handle owns the file; it must stay alive until helm has
/// read it.
pub fn write_values_file(yaml: &str) -> Result<NamedTempFile> {
    let file = tempfile::Builder::new()
        .prefix("bosun-values-")
        .suffix(".yaml")
        .tempfile()?;
    std::fs::write(file.path(), yaml)?;
    debug!(path = %file.path().display(), "values file written");
    Ok(file)
}
