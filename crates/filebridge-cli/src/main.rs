//! FileBridge CLI - Command-line interface for FileBridge
//!
//! Provides commands for:
//! - Listing the endpoints of this worker instance
//! - Showing transfer schedules and their next run
//! - Checking connectivity to an endpoint
//! - Running a manual transfer to completion

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    check::CheckCommand, completions::CompletionsCommand, endpoints::EndpointsCommand,
    schedules::SchedulesCommand, sync_now::SyncNowCommand, Workspace,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "filebridge",
    version,
    about = "Scheduled file transfers over FTP, FTPS, SFTP and local copy"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the endpoints of this instance
    Endpoints(EndpointsCommand),
    /// Show the schedules of an endpoint
    Schedules(SchedulesCommand),
    /// Test the connection to an endpoint
    Check(CheckCommand),
    /// Run a transfer for an endpoint now and wait for it
    SyncNow(SyncNowCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

/// Log level for the `-v` count; the config level applies without flags
fn verbosity_filter(verbose: u8) -> Option<&'static str> {
    match verbose {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = OutputFormat::from_json_flag(cli.json);

    if let Commands::Completions(cmd) = &cli.command {
        return cmd.execute(format);
    }

    let workspace = Workspace::open(cli.config.as_deref()).await?;

    let level = verbosity_filter(cli.verbose).unwrap_or(workspace.config.logging.level.as_str());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Endpoints(cmd) => cmd.execute(&workspace, format).await,
        Commands::Schedules(cmd) => cmd.execute(&workspace, format).await,
        Commands::Check(cmd) => cmd.execute(&workspace, format).await,
        Commands::SyncNow(cmd) => cmd.execute(&workspace, format).await,
        Commands::Completions(cmd) => cmd.execute(format),
    }
}
