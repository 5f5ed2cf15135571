//! CLI argument definitions

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use cnibench_runner::TimedPhase;

#[derive(Parser)]
#[command(name = "cnibench")]
#[command(about = "Lifecycle benchmark for CNI plugins", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags layered over the configuration file
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// JSON configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory holding one <plugin>.conf per plugin
    #[arg(long, global = true, value_name = "DIR")]
    pub conf_dir: Option<PathBuf>,

    /// Plugin binary directory (repeatable, searched in order)
    #[arg(long = "plugin-dir", global = true, value_name = "DIR")]
    pub plugin_dirs: Vec<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Attach and detach every plugin in the catalog once
    Run {
        /// Skip link enumeration and the outbound probe
        #[arg(long)]
        no_diagnostics: bool,
    },

    /// Time attach and detach of one plugin over many iterations
    Bench {
        /// Plugin to benchmark
        #[arg(short, long)]
        plugin: String,

        /// Number of full lifecycles
        #[arg(short = 'n', long, default_value = "10")]
        iterations: usize,

        /// Phase to report (attach, detach or both)
        #[arg(long, default_value = "both")]
        phase: TimedPhase,

        /// Print the raw samples as JSON
        #[arg(long)]
        json: bool,

        /// Also run diagnostics inside every iteration
        #[arg(long)]
        diagnostics: bool,
    },

    /// List the plugins in the catalog
    List,

    /// Show version information
    Version,
}
