//! Readiness targets and subprocess results

use serde::{Deserialize, Serialize};

/// The resource categories the installer actually waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetCategory {
    Crd,
    Namespace,
    Deployment,
    StatefulSet,
}

impl TargetCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetCategory::Crd => "crd",
            TargetCategory::Namespace => "namespace",
            TargetCategory::Deployment => "deployment",
            TargetCategory::StatefulSet => "statefulset",
        }
    }

    /// Whether resources of this category live inside a namespace.
    pub fn namespaced(&self) -> bool {
        matches!(self, TargetCategory::Deployment | TargetCategory::StatefulSet)
    }
}

/// One named condition the orchestrator must observe before proceeding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadinessTarget {
    pub category: TargetCategory,
    pub name: String,
    /// Empty for cluster-scoped targets.
    pub namespace: String,
}

impl ReadinessTarget {
    pub fn cluster_scoped(category: TargetCategory, name: impl Into<String>) -> Self {
        Self {
            category,
            name: name.into(),
            namespace: String::new(),
        }
    }

    pub fn namespaced(
        category: TargetCategory,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            category,
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for ReadinessTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.category.as_str(), self.name)
        } else {
            write!(
                f,
                "{}/{} (namespace {})",
                self.category.as_str(),
                self.name,
                self.namespace
            )
        }
    }
}

/// Captured output of one subprocess invocation.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stderr if non-empty, otherwise stdout. Helm and kubectl are not
    /// consistent about which stream the interesting line lands on.
    pub fn message(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}
