//! cnibench CLI
//!
//! Spawns an isolated process per plugin, attaches and detaches the plugin's
//! network and reports what happened and how long it took.

use clap::Parser;
use std::process;
use tracing::Level;

mod cli;
mod commands;

use cli::Cli;

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    // Execute the command
    if let Err(e) = commands::dispatch(cli.command, &cli.config).await {
        eprintln!("❌ Error: {e:#}");
        process::exit(1);
    }
}
