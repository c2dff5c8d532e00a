//! `status` and `export` commands.

use std::path::{Path, PathBuf};

use console::style;

use crate::config::Config;
use crate::workspace::WorkspaceManager;

pub fn cmd_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let workspace = WorkspaceManager::new(config.workspace_root());
    let summaries = workspace.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!(
            "{} No workspaces in {}",
            style("!").yellow(),
            workspace.root().display()
        );
        return Ok(());
    }

    println!("{}", style(format!("Workspaces in {}", workspace.root().display())).bold());
    for summary in &summaries {
        let digest = summary
            .digest
            .as_deref()
            .map(|d| &d[..12.min(d.len())])
            .unwrap_or("-");
        let modified = summary
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<24} {}  {}  {}",
            style(&summary.target_name).cyan(),
            digest,
            style(modified).dim(),
            summary.files.join(", ")
        );
    }
    Ok(())
}

pub fn cmd_export(config: &Config, target: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let workspace = WorkspaceManager::new(config.workspace_root());
    let dest = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format!("{}.zip", target)));
    let path = workspace.export_bundle(target, &dest)?;
    println!("{} Exported {} to {}", style("✓").green(), target, path.display());
    Ok(())
}
