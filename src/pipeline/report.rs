//! Generation report: the single result of an orchestrator run.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use super::{Stage, StageError};
use crate::models::{DeploymentRecord, DeploymentStatus, ExtractionSchema, StorageSchema};
use crate::openapi::ApiSummary;

/// Timing of one stage that actually ran.
#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub succeeded: bool,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

/// Why a run ended in `FAILED`.
#[derive(Debug, Clone)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: StageError,
}

impl Serialize for StageFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct View<'a> {
            stage: Stage,
            kind: &'static str,
            message: &'a str,
        }
        View {
            stage: self.stage,
            kind: self.error.kind(),
            message: self.error.message(),
        }
        .serialize(serializer)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub target_name: String,
    /// `DONE` or `FAILED`.
    pub outcome: Stage,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    pub stages: Vec<StageTiming>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiSummary>,
    pub sample_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_schema: Option<ExtractionSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_schema: Option<StorageSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    /// SHA-256 of the rendered connector source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentRecord>,
}

fn as_millis<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(d.as_millis() as u64)
}

impl GenerationReport {
    pub(super) fn new(target_name: &str) -> Self {
        Self {
            target_name: target_name.to_string(),
            outcome: Stage::Analyzing,
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            stages: Vec::new(),
            failure: None,
            api: None,
            sample_count: 0,
            extraction_schema: None,
            storage_schema: None,
            workspace: None,
            digest: None,
            deployment: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Stage::Done
    }

    /// Stages in the order they ran.
    pub fn stage_sequence(&self) -> Vec<Stage> {
        self.stages.iter().map(|t| t.stage).collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Plain-text summary for terminals and logs.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Target:   {}", self.target_name);
        let _ = writeln!(
            out,
            "Outcome:  {} ({:.1}s)",
            self.outcome,
            self.elapsed.as_secs_f64()
        );

        out.push_str("\nStages:\n");
        for timing in &self.stages {
            let _ = writeln!(
                out,
                "  {:<14} {:<6} {:>7.2}s",
                timing.stage.as_str(),
                if timing.succeeded { "ok" } else { "failed" },
                timing.elapsed.as_secs_f64()
            );
        }

        if let Some(ref failure) = self.failure {
            let _ = writeln!(out, "\nFailed in {}: {}", failure.stage, failure.error);
        }

        if let Some(ref api) = self.api {
            let _ = writeln!(
                out,
                "\nAPI:      {} {} ({} endpoints, auth: {})",
                api.title,
                api.version,
                api.endpoints.len(),
                api.auth_type
            );
        }

        if let Some(ref storage) = self.storage_schema {
            for table in &storage.tables {
                let _ = writeln!(
                    out,
                    "\nTable {} (primary key: {})",
                    table.table_name,
                    table.primary_key.join(", ")
                );
                for (name, ty) in &table.columns {
                    let _ = writeln!(out, "  {:<24} {}", name, ty.as_str());
                }
            }
        }
        if let Some(ref extraction) = self.extraction_schema {
            let skipped: Vec<&str> = extraction
                .fields
                .iter()
                .filter(|(_, spec)| !spec.storable)
                .map(|(name, _)| name.as_str())
                .collect();
            if !skipped.is_empty() {
                let _ = writeln!(out, "  (extracted, not stored: {})", skipped.join(", "));
            }
        }

        if let Some(ref path) = self.workspace {
            let _ = writeln!(out, "\nWorkspace: {}", path.display());
        }
        if let Some(ref digest) = self.digest {
            let _ = writeln!(out, "Digest:    {}", digest);
        }

        if let Some(ref record) = self.deployment {
            let _ = write!(out, "\nDeployment: {}", record.status().as_str());
            match record.status() {
                DeploymentStatus::Deployed => {
                    let _ = writeln!(out, " (connector {})", record.connector_id().unwrap_or("?"));
                }
                _ => {
                    let _ = writeln!(out, " ({})", record.error_detail().unwrap_or("-"));
                }
            }
            if !record.fallback_commands().is_empty() {
                out.push_str("\nDeploy manually with:\n");
                for cmd in record.fallback_commands() {
                    let _ = writeln!(out, "  {}", cmd);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::ExtractionError;

    #[test]
    fn test_failed_report_json() {
        let mut report = GenerationReport::new("jobs");
        report.outcome = Stage::Failed;
        report.stages.push(StageTiming {
            stage: Stage::Analyzing,
            succeeded: false,
            elapsed: Duration::from_millis(1500),
        });
        report.failure = Some(StageFailure {
            stage: Stage::Analyzing,
            error: StageError::Extraction(ExtractionError::empty("nothing there")),
        });

        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["outcome"], "FAILED");
        assert_eq!(value["stages"][0]["elapsed_ms"], 1500);
        assert_eq!(value["failure"]["stage"], "ANALYZING");
        assert_eq!(value["failure"]["kind"], "EMPTY_RESULT");
        assert_eq!(value["failure"]["message"], "nothing there");
        assert!(value.get("deployment").is_none());

        let summary = report.render_summary();
        assert!(summary.contains("Failed in ANALYZING: EMPTY_RESULT: nothing there"));
    }

    #[test]
    fn test_summary_lists_fallback_commands() {
        let mut report = GenerationReport::new("jobs");
        report.outcome = Stage::Done;
        report.deployment = Some(DeploymentRecord::failed(
            "AUTH_REJECTED: HTTP 401",
            vec!["cd /tmp/jobs".into(), "fivetran deploy .".into()],
        ));
        let summary = report.render_summary();
        assert!(summary.contains("Deployment: failed (AUTH_REJECTED: HTTP 401)"));
        assert!(summary.contains("  fivetran deploy ."));
    }
}
