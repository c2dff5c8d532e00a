//! Deployment outcome record.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Deployed,
    Failed,
    Skipped,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Deployed => "deployed",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Skipped => "skipped",
        }
    }
}

/// Outcome of one deployment attempt.
///
/// Created once per run and never mutated; the next run supersedes it.
/// Fields are private so the status/field combinations stay consistent:
/// only `Failed` carries fallback commands, only `Deployed` a connector id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    status: DeploymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connector_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    fallback_commands: Vec<String>,
}

impl DeploymentRecord {
    pub fn deployed(connector_id: impl Into<String>) -> Self {
        Self {
            status: DeploymentStatus::Deployed,
            connector_id: Some(connector_id.into()),
            error_detail: None,
            fallback_commands: Vec::new(),
        }
    }

    pub fn failed(error_detail: impl Into<String>, fallback_commands: Vec<String>) -> Self {
        Self {
            status: DeploymentStatus::Failed,
            connector_id: None,
            error_detail: Some(error_detail.into()),
            fallback_commands,
        }
    }

    /// Deployment was not attempted. `reason` explains why (for example
    /// auto-deploy off, or mock mode).
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: DeploymentStatus::Skipped,
            connector_id: None,
            error_detail: Some(reason.into()),
            fallback_commands: Vec::new(),
        }
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn connector_id(&self) -> Option<&str> {
        self.connector_id.as_deref()
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn fallback_commands(&self) -> &[String] {
        &self.fallback_commands
    }

    /// Fallback commands joined into one copy-pasteable script.
    pub fn fallback_script(&self) -> String {
        self.fallback_commands.join("\n")
    }
}
