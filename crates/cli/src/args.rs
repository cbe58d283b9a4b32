//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// convoca: conversation engine for civic-engagement campaigns on social channels
#[derive(Parser, Debug)]
#[command(name = "convoca")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Listen for posts, manage conversations, and dispatch replies
    Run(RunArgs),

    /// Feed posts through the conversation engine without a channel
    Simulate(SimulateArgs),

    /// Manage campaign definitions
    Campaigns(CampaignsArgs),

    /// Configuration management
    Config(ConfigArgs),

    /// Validate configuration and show status
    Doctor(DoctorArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Use a stub channel instead of delivering for real
    #[arg(long)]
    pub dry_run: bool,

    /// Drain the current inbound backlog and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// JSON file with one post or an array of posts (use - for stdin)
    #[arg(long)]
    pub file: PathBuf,

    /// Override the campaigns file
    #[arg(long)]
    pub campaigns: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct CampaignsArgs {
    #[command(subcommand)]
    pub command: CampaignsCommands,
}

#[derive(Subcommand, Debug)]
pub enum CampaignsCommands {
    /// Write an example campaigns file
    Init {
        /// Destination path
        #[arg(long, default_value = "./campaigns.toml")]
        path: PathBuf,
    },

    /// List initiatives, campaigns, and challenges
    List {
        /// Override the campaigns file
        #[arg(long)]
        campaigns: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the campaigns file
    Validate {
        /// Override the campaigns file
        #[arg(long)]
        campaigns: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write an example configuration file
    Init {
        /// Destination path
        #[arg(long, default_value = "./config.toml")]
        path: PathBuf,
    },

    /// Show the effective configuration
    Show,
}

#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
