use anyhow::{Context, Result};
use cnibench_core::BenchConfig;

use crate::cli::{Commands, ConfigArgs};

pub mod bench;
pub mod list;
pub mod run;

/// Dispatch command to appropriate handler
pub async fn dispatch(command: Commands, args: &ConfigArgs) -> Result<()> {
    match command {
        Commands::Run { no_diagnostics } => {
            let config = resolve_config(args)?.with_diagnostics(!no_diagnostics);
            run::execute(&config).await
        }

        Commands::Bench {
            plugin,
            iterations,
            phase,
            json,
            diagnostics,
        } => {
            let config = resolve_config(args)?;
            bench::execute(&config, &plugin, iterations, phase, json, diagnostics).await
        }

        Commands::List => list::execute(&resolve_config(args)?).await,

        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Configuration file (or defaults), rooted at the working directory, with
/// command-line overrides on top
fn resolve_config(args: &ConfigArgs) -> Result<BenchConfig> {
    let mut config = match &args.config {
        Some(path) => BenchConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => BenchConfig::default(),
    };

    if let Some(dir) = &args.conf_dir {
        config = config.with_conf_dir(dir);
    }
    if !args.plugin_dirs.is_empty() {
        config = config.with_plugin_dirs(args.plugin_dirs.clone());
    }

    let cwd = std::env::current_dir().context("Failed to resolve working directory")?;
    let config = config.rooted_at(&cwd);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Bail unless running with the privileges namespace switching needs
fn require_root(command: &str) -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        anyhow::bail!("Must run as root. Try: sudo cnibench {command}");
    }
    Ok(())
}

fn print_version() {
    println!("🦀 cnibench");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Edition: Rust 2024");
    println!();
    println!("Measures:");
    println!("  • CNI ADD (attach) latency");
    println!("  • CNI DEL (detach) latency");
    println!("  • Connectivity inside the isolated namespace");
}
