//! `generate` command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use console::style;
use tokio::sync::{mpsc, watch};

use crate::cli::progress::StageProgress;
use crate::config::Config;
use crate::deploy::{DeploymentGateway, FivetranHost};
use crate::extraction::{ExtractionProbe, Extractor, FirecrawlClient, StaticExtractor};
use crate::llm::LlmClient;
use crate::models::GenerationRequest;
use crate::pipeline::{Orchestrator, PipelineEvent};
use crate::synthesis::LlmFieldDescriber;
use crate::workspace::WorkspaceManager;

/// Time given to the initial sync request before the process exits.
const SYNC_GRACE: Duration = Duration::from_secs(10);

pub struct GenerateArgs {
    pub target: String,
    pub url: String,
    pub prompt: String,
    pub destination: String,
    pub deploy: bool,
    pub api_spec: Option<PathBuf>,
    pub samples: Option<PathBuf>,
    pub table: Option<String>,
    pub json: bool,
}

pub async fn cmd_generate(config: &Config, args: GenerateArgs) -> anyhow::Result<()> {
    let mut request =
        GenerationRequest::new(&args.target, &args.url, &args.prompt, &args.destination)?
            .with_auto_deploy(args.deploy)
            .with_credentials(config.credentials());
    if let Some(ref path) = args.api_spec {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read API spec {}", path.display()))?;
        request = request.with_api_spec(text);
    }
    if let Some(ref table) = args.table {
        request = request.with_table_name(table);
    }

    let extractor: Arc<dyn Extractor> = match args.samples {
        Some(ref path) => Arc::new(StaticExtractor::from_json_file(path)?),
        None => Arc::new(FirecrawlClient::new(config.extraction.firecrawl_config())?),
    };
    let probe = ExtractionProbe::new(extractor).with_retry(config.extraction.retry_policy());

    let mut orchestrator = Orchestrator::new(probe, WorkspaceManager::new(config.workspace_root()))
        .with_synthesizer(config.synthesis.synthesizer())
        .with_timeouts(config.stage_timeouts());

    if config.llm.enabled {
        match LlmClient::new(config.llm.clone()) {
            Ok(client) => {
                orchestrator = orchestrator.with_describer(Arc::new(LlmFieldDescriber::new(client)))
            }
            Err(e) => tracing::warn!("Field descriptions disabled: {}", e),
        }
    }

    let gateway = if args.deploy {
        let host = FivetranHost::new(config.deploy.fivetran_config())?;
        let gateway =
            DeploymentGateway::new(Arc::new(host)).with_trigger_sync(config.deploy.trigger_sync);
        orchestrator = orchestrator.with_gateway(gateway.clone());
        Some(gateway)
    } else {
        None
    };

    if !request.credentials().is_live() && args.deploy {
        eprintln!(
            "{} No deployment key configured; running in mock mode (deployment skipped)",
            style("!").yellow()
        );
    }

    let (event_tx, mut event_rx) = mpsc::channel::<PipelineEvent>(32);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{} Interrupted; stopping after the current stage",
                style("!").yellow()
            );
            let _ = cancel_tx.send(true);
        }
    });

    let show_progress = !args.json;
    let event_handler = tokio::spawn(async move {
        let mut display = StageProgress::new();
        while let Some(event) = event_rx.recv().await {
            if show_progress {
                display.handle(event);
            }
        }
    });

    let report = orchestrator.run(&request, event_tx, cancel_rx).await;
    let _ = event_handler.await;
    interrupt.abort();

    if let Some(gateway) = gateway {
        gateway.wait_for_syncs(SYNC_GRACE).await;
    }

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        println!();
        print!("{}", report.render_summary());
    }

    match report.failure {
        Some(failure) => anyhow::bail!("generation failed in {}: {}", failure.stage, failure.error),
        None => Ok(()),
    }
}
