//! `deploy` and `destinations` commands.

use std::sync::Arc;
use std::time::Duration;

use console::style;

use crate::config::Config;
use crate::deploy::{DeploymentGateway, FivetranHost};
use crate::models::DeploymentStatus;
use crate::workspace::WorkspaceManager;

fn gateway(config: &Config) -> anyhow::Result<DeploymentGateway> {
    let host = FivetranHost::new(config.deploy.fivetran_config())?;
    Ok(DeploymentGateway::new(Arc::new(host)).with_trigger_sync(config.deploy.trigger_sync))
}

/// Redeploy an existing workspace, holding its lock for the duration.
pub async fn cmd_deploy(config: &Config, target: &str, destination: &str) -> anyhow::Result<()> {
    let workspace = WorkspaceManager::new(config.workspace_root());
    let path = workspace.path_for(target);
    if !path.is_dir() {
        anyhow::bail!(
            "No workspace for '{}' in {}. Run 'pipewright generate' first.",
            target,
            workspace.root().display()
        );
    }
    let _lease = workspace.lock(target)?;

    let gateway = gateway(config)?;
    let record = gateway
        .deploy(
            &path,
            destination,
            target,
            &config.credentials(),
            Duration::from_secs(config.deploy.timeout_secs),
        )
        .await;

    match record.status() {
        DeploymentStatus::Deployed => {
            println!(
                "{} Deployed {} as connector {}",
                style("✓").green(),
                target,
                record.connector_id().unwrap_or("?")
            );
            gateway.wait_for_syncs(Duration::from_secs(10)).await;
            Ok(())
        }
        _ => {
            eprintln!(
                "{} Deployment failed: {}",
                style("✗").red(),
                record.error_detail().unwrap_or("unknown error")
            );
            eprintln!("\nDeploy manually with:");
            for cmd in record.fallback_commands() {
                eprintln!("  {}", cmd);
            }
            anyhow::bail!("deployment of '{}' failed", target)
        }
    }
}

/// Setup-time check: which destinations can the configured key deploy to?
pub async fn cmd_destinations(config: &Config) -> anyhow::Result<()> {
    let destinations = gateway(config)?
        .list_destinations(&config.credentials())
        .await?;

    if destinations.is_empty() {
        println!("{} No destinations visible to this key", style("!").yellow());
        return Ok(());
    }
    println!("{} destination(s):", destinations.len());
    for name in destinations {
        println!("  {} {}", style("→").dim(), name);
    }
    Ok(())
}
