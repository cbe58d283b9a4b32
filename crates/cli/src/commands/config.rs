//! Config command - configuration management

use anyhow::{Context, Result};
use std::fs;

use crate::args::{ConfigArgs, ConfigCommands};
use crate::config::AppConfig;

pub async fn execute(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Init { path } => init_config(path).await,
        ConfigCommands::Show => show_config().await,
    }
}

async fn init_config(path: std::path::PathBuf) -> Result<()> {
    if path.exists() {
        anyhow::bail!("Config file already exists: {}", path.display());
    }

    let content = AppConfig::example_toml();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    fs::write(&path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    println!("Created config file: {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file and export the channel token env vars");
    println!("  2. Run 'convoca campaigns init' and describe your initiatives");
    println!("  3. Run 'convoca doctor' to validate your setup");
    println!("  4. Run 'convoca run --dry-run --once' to test");

    Ok(())
}

async fn show_config() -> Result<()> {
    let config = AppConfig::load(None)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}
