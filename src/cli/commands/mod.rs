//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod config_cmd;
mod deploy;
mod generate;
mod workspace;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "pipewright")]
#[command(about = "Generate deployable data-ingestion connectors from plain-language source descriptions")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Generate (or regenerate) a connector workspace for a source
    Generate {
        /// Target name; also the workspace directory and connection name
        target: String,
        /// Source URL; end with /* to crawl every page under the path
        #[arg(short, long)]
        url: String,
        /// What to extract, in plain language
        #[arg(short, long)]
        prompt: String,
        /// Destination (warehouse) name on the hosting service
        #[arg(short, long, env = "PIPEWRIGHT_DESTINATION")]
        destination: String,
        /// Deploy after generating (requires deployment credentials)
        #[arg(long)]
        deploy: bool,
        /// OpenAPI document (JSON or YAML) describing the source
        #[arg(long)]
        api_spec: Option<PathBuf>,
        /// Use sample records from a JSON file instead of calling the extraction service
        #[arg(long)]
        samples: Option<PathBuf>,
        /// Storage table name (default from config)
        #[arg(long)]
        table: Option<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Deploy an existing workspace
    Deploy {
        /// Target name of the workspace
        target: String,
        /// Destination (warehouse) name on the hosting service
        #[arg(short, long, env = "PIPEWRIGHT_DESTINATION")]
        destination: String,
    },

    /// List generated workspaces
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List destinations visible to the deployment credentials
    Destinations,

    /// Zip a workspace's shareable files (never the configuration file)
    Export {
        /// Target name of the workspace
        target: String,
        /// Output archive (default: <target>.zip)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the effective configuration (credentials redacted)
    Config,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Generate {
            target,
            url,
            prompt,
            destination,
            deploy,
            api_spec,
            samples,
            table,
            json,
        } => {
            generate::cmd_generate(
                &config,
                generate::GenerateArgs {
                    target,
                    url,
                    prompt,
                    destination,
                    deploy,
                    api_spec,
                    samples,
                    table,
                    json,
                },
            )
            .await
        }
        Commands::Deploy {
            target,
            destination,
        } => deploy::cmd_deploy(&config, &target, &destination).await,
        Commands::Status { json } => workspace::cmd_status(&config, json),
        Commands::Destinations => deploy::cmd_destinations(&config).await,
        Commands::Export { target, output } => {
            workspace::cmd_export(&config, &target, output.as_deref())
        }
        Commands::Config => config_cmd::cmd_config(&config),
    }
}
