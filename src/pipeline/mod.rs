//! Pipeline orchestrator.
//!
//! Runs one generation request through a fixed stage sequence:
//!
//! ```text
//! ANALYZING -> SCHEMA_SYNTH -> RENDERING -> MATERIALIZING -> [DEPLOYING] -> DONE
//! ```
//!
//! Any stage failure moves straight to `FAILED`. Nothing is retried here;
//! retry policy belongs to the collaborators. Progress is reported through
//! [`PipelineEvent`]s, and the [`GenerationReport`] is the only result.

mod report;

pub use report::{GenerationReport, StageFailure, StageTiming};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::deploy::DeploymentGateway;
use crate::extraction::{ExtractionError, ExtractionProbe};
use crate::models::{DeploymentRecord, GenerationRequest};
use crate::openapi::ApiSpec;
use crate::synthesis::{describe_with_fallback, FieldDescriber, SchemaError, Synthesizer};
use crate::template::{build_artifact, RenderError, Template};
use crate::workspace::{WorkspaceError, WorkspaceManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Analyzing,
    SchemaSynth,
    Rendering,
    Materializing,
    Deploying,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Analyzing => "ANALYZING",
            Stage::SchemaSynth => "SCHEMA_SYNTH",
            Stage::Rendering => "RENDERING",
            Stage::Materializing => "MATERIALIZING",
            Stage::Deploying => "DEPLOYING",
            Stage::Done => "DONE",
            Stage::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress side channel. `elapsed` is measured from the start of the run.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageStarted {
        stage: Stage,
        elapsed: Duration,
    },
    StageCompleted {
        stage: Stage,
        elapsed: Duration,
        detail: String,
    },
    StageFailed {
        stage: Stage,
        elapsed: Duration,
        error: String,
    },
    /// Terminal transition to `DONE` or `FAILED`.
    Finished {
        outcome: Stage,
        elapsed: Duration,
    },
}

/// A fatal stage error. Deployment errors never appear here; they become a
/// failed [`DeploymentRecord`] instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error("CANCELLED: {0}")]
    Cancelled(String),
}

impl StageError {
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Extraction(e) => e.kind.as_str(),
            StageError::Schema(e) => e.kind.as_str(),
            StageError::Render(e) => e.kind.as_str(),
            StageError::Workspace(e) => e.kind.as_str(),
            StageError::Cancelled(_) => "CANCELLED",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StageError::Extraction(e) => &e.message,
            StageError::Schema(e) => &e.message,
            StageError::Render(e) => &e.message,
            StageError::Workspace(e) => &e.message,
            StageError::Cancelled(message) => message,
        }
    }
}

/// Upper bounds for the stages that call out to external services.
#[derive(Debug, Clone)]
pub struct StageTimeouts {
    pub probe: Duration,
    pub describe: Duration,
    pub deploy: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(120),
            describe: Duration::from_secs(30),
            deploy: Duration::from_secs(300),
        }
    }
}

/// Sequences the generation stages for one request at a time. Cheap to
/// clone; concurrent runs for different targets are independent.
#[derive(Clone)]
pub struct Orchestrator {
    probe: ExtractionProbe,
    synthesizer: Synthesizer,
    describer: Option<Arc<dyn FieldDescriber>>,
    template: Template,
    workspace: WorkspaceManager,
    gateway: Option<DeploymentGateway>,
    timeouts: StageTimeouts,
}

impl Orchestrator {
    pub fn new(probe: ExtractionProbe, workspace: WorkspaceManager) -> Self {
        Self {
            probe,
            synthesizer: Synthesizer::default(),
            describer: None,
            template: Template::connector(),
            workspace,
            gateway: None,
            timeouts: StageTimeouts::default(),
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: Synthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_describer(mut self, describer: Arc<dyn FieldDescriber>) -> Self {
        self.describer = Some(describer);
        self
    }

    pub fn with_gateway(mut self, gateway: DeploymentGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn workspace(&self) -> &WorkspaceManager {
        &self.workspace
    }

    /// Run without observers or cancellation.
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationReport {
        let (event_tx, _) = mpsc::channel(1);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.run(request, event_tx, cancel_rx).await
    }

    /// Run `request` to a terminal state.
    ///
    /// `cancel` is checked before each stage starts; a stage already in
    /// flight always finishes.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        event_tx: mpsc::Sender<PipelineEvent>,
        cancel: watch::Receiver<bool>,
    ) -> GenerationReport {
        let mut run = Run {
            started: Instant::now(),
            report: GenerationReport::new(request.target_name()),
            event_tx,
            cancel,
        };
        info!(
            "Generating '{}' from {} ({} mode)",
            request.target_name(),
            request.source_url(),
            if request.credentials().is_live() { "live" } else { "mock" }
        );

        match self.run_stages(request, &mut run).await {
            Ok(()) => run.finish(Stage::Done).await,
            Err(failure) => {
                warn!(
                    "Generation of '{}' failed in {}: {}",
                    request.target_name(),
                    failure.stage,
                    failure.error
                );
                run.report.failure = Some(failure);
                run.finish(Stage::Failed).await
            }
        }
    }

    async fn run_stages(
        &self,
        request: &GenerationRequest,
        run: &mut Run,
    ) -> Result<(), StageFailure> {
        let (sample, api) = run
            .stage(Stage::Analyzing, async {
                let hint = match request.api_spec() {
                    Some(text) => {
                        let spec = ApiSpec::parse(text).map_err(|e| {
                            ExtractionError::invalid(format!("API specification: {}", e))
                        })?;
                        Some((spec.summary(), spec.schema_hint()))
                    }
                    None => None,
                };
                let sample = self
                    .probe
                    .probe(
                        request.source_url(),
                        request.intent_text(),
                        hint.as_ref().and_then(|(_, schema)| schema.as_ref()),
                        request.credentials().extraction_key.as_ref(),
                        self.timeouts.probe,
                    )
                    .await?;
                let detail = format!("{} sample records", sample.len());
                Ok::<_, StageError>(((sample, hint.map(|(summary, _)| summary)), detail))
            })
            .await?;
        run.report.sample_count = sample.len();
        run.report.api = api;

        let (extraction, storage) = run
            .stage(Stage::SchemaSynth, async {
                let synthesizer = match request.table_name() {
                    Some(table) => self.synthesizer.clone().with_table_name(table),
                    None => self.synthesizer.clone(),
                };
                let (extraction, storage) =
                    synthesizer.synthesize(&sample, request.intent_text())?;
                let extraction = match self.describer {
                    Some(ref describer) => {
                        describe_with_fallback(
                            describer.as_ref(),
                            request.intent_text(),
                            &sample,
                            extraction,
                            &storage,
                            self.timeouts.describe,
                        )
                        .await?
                    }
                    None => extraction,
                };
                let detail = format!(
                    "{} fields, {} stored",
                    extraction.len(),
                    storage.tables.iter().map(|t| t.columns.len()).sum::<usize>()
                );
                Ok::<_, StageError>(((extraction, storage), detail))
            })
            .await?;
        run.report.extraction_schema = Some(extraction.clone());
        run.report.storage_schema = Some(storage.clone());

        let artifact = run
            .stage(Stage::Rendering, async {
                let artifact = build_artifact(&self.template, request, &extraction, &storage)?;
                let detail = format!("{} bytes", artifact.connector_source.len());
                Ok::<_, StageError>((artifact, detail))
            })
            .await?;
        run.report.digest = Some(artifact.digest());

        // The lease covers materialize and deploy.
        let (lease, path) = run
            .stage(Stage::Materializing, async {
                let lease = self.workspace.lock(request.target_name())?;
                let path = self.workspace.materialize(&lease, &artifact)?;
                let detail = path.display().to_string();
                Ok::<_, StageError>(((lease, path), detail))
            })
            .await?;
        run.report.workspace = Some(path.clone());

        let record = match self.deploy_skip_reason(request) {
            Some(reason) => {
                debug!("Skipping deployment: {}", reason);
                DeploymentRecord::skipped(reason)
            }
            None => {
                run.stage(Stage::Deploying, async {
                    let record = match self.gateway {
                        Some(ref gateway) => {
                            gateway
                                .deploy(
                                    &path,
                                    request.destination_name(),
                                    request.target_name(),
                                    request.credentials(),
                                    self.timeouts.deploy,
                                )
                                .await
                        }
                        None => DeploymentRecord::skipped("no deployment gateway configured"),
                    };
                    let detail = record.status().as_str().to_string();
                    Ok::<_, StageError>((record, detail))
                })
                .await?
            }
        };
        run.report.deployment = Some(record);
        drop(lease);
        Ok(())
    }

    /// Why `DEPLOYING` does not run for `request`, if it doesn't.
    fn deploy_skip_reason(&self, request: &GenerationRequest) -> Option<&'static str> {
        if !request.auto_deploy() {
            Some("auto-deploy disabled")
        } else if !request.credentials().is_live() {
            Some("mock mode: no deployment credentials")
        } else if self.gateway.is_none() {
            Some("no deployment gateway configured")
        } else {
            None
        }
    }
}

/// Mutable state of one run.
struct Run {
    started: Instant,
    report: GenerationReport,
    event_tx: mpsc::Sender<PipelineEvent>,
    cancel: watch::Receiver<bool>,
}

impl Run {
    /// Execute one stage: honour cancellation, emit events, record timing.
    async fn stage<T, F>(&mut self, stage: Stage, body: F) -> Result<T, StageFailure>
    where
        F: Future<Output = Result<(T, String), StageError>>,
    {
        if *self.cancel.borrow() {
            let error = StageError::Cancelled(format!("cancelled before {}", stage));
            self.emit(PipelineEvent::StageFailed {
                stage,
                elapsed: self.started.elapsed(),
                error: error.to_string(),
            })
            .await;
            return Err(StageFailure { stage, error });
        }

        debug!("Entering {}", stage);
        self.emit(PipelineEvent::StageStarted {
            stage,
            elapsed: self.started.elapsed(),
        })
        .await;

        let stage_started = Instant::now();
        let outcome = body.await;
        self.report.stages.push(StageTiming {
            stage,
            succeeded: outcome.is_ok(),
            elapsed: stage_started.elapsed(),
        });

        match outcome {
            Ok((value, detail)) => {
                self.emit(PipelineEvent::StageCompleted {
                    stage,
                    elapsed: self.started.elapsed(),
                    detail,
                })
                .await;
                Ok(value)
            }
            Err(error) => {
                self.emit(PipelineEvent::StageFailed {
                    stage,
                    elapsed: self.started.elapsed(),
                    error: error.to_string(),
                })
                .await;
                Err(StageFailure { stage, error })
            }
        }
    }

    async fn emit(&self, event: PipelineEvent) {
        let _ = self.event_tx.send(event).await;
    }

    async fn finish(mut self, outcome: Stage) -> GenerationReport {
        self.report.outcome = outcome;
        self.report.elapsed = self.started.elapsed();
        self.emit(PipelineEvent::Finished {
            outcome,
            elapsed: self.report.elapsed,
        })
        .await;
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::SchemaSynth.to_string(), "SCHEMA_SYNTH");
        assert_eq!(
            serde_json::to_string(&Stage::Materializing).unwrap(),
            "\"MATERIALIZING\""
        );
        assert!(Stage::Failed.is_terminal());
        assert!(!Stage::Deploying.is_terminal());
    }

    #[test]
    fn test_stage_error_kind_and_message() {
        let err = StageError::from(SchemaError::no_primary_key("no candidate"));
        assert_eq!(err.kind(), "NO_PRIMARY_KEY");
        assert_eq!(err.message(), "no candidate");
        assert_eq!(err.to_string(), "NO_PRIMARY_KEY: no candidate");

        let err = StageError::Cancelled("cancelled before RENDERING".into());
        assert_eq!(err.kind(), "CANCELLED");
    }
}
