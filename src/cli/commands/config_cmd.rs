//! Configuration display.

use console::style;

use crate::config::Config;

/// Print the effective configuration. Credentials serialize as a
/// redaction marker, so nothing secret reaches the terminal.
pub fn cmd_config(config: &Config) -> anyhow::Result<()> {
    match config.source_path {
        Some(ref path) => eprintln!("{} Loaded from {}", style("→").dim(), path.display()),
        None => eprintln!("{} No config file found; using defaults", style("→").dim()),
    }
    eprintln!(
        "{} Workspace root: {}",
        style("→").dim(),
        config.workspace_root().display()
    );
    eprintln!(
        "{} Mode: {}",
        style("→").dim(),
        if config.credentials().is_live() { "live" } else { "mock (no deployment key)" }
    );
    println!("{}", config.to_redacted_json()?);
    Ok(())
}
