//! Run command implementation

use anyhow::{Context, Result};
use cnibench_cni::catalog;
use cnibench_core::{BenchConfig, PluginId};
use cnibench_runner::{IterationOptions, IterationReport, NetnsWorker};
use tracing::{error, info};

pub async fn execute(config: &BenchConfig) -> Result<()> {
    super::require_root("run")?;

    let plugins = catalog::list(&config.conf_dir)
        .await
        .context("Failed to read plugin catalog")?;

    if plugins.is_empty() {
        println!("No plugins found in {}", config.conf_dir.display());
        return Ok(());
    }

    let names: Vec<&str> = plugins.iter().map(PluginId::as_str).collect();
    info!(
        pid = std::process::id(),
        conf_dir = %config.conf_dir.display(),
        "Found plugin configurations for {}",
        names.join(", ")
    );

    let worker = NetnsWorker::start(config)
        .await
        .context("Failed to start namespace worker")?;

    let options = IterationOptions::verbose().with_diagnostics(config.diagnostics);
    let mut failed = 0;

    for plugin in &plugins {
        info!(plugin = %plugin, "Creating network");
        match worker.create_network(plugin, options).await {
            Ok(report) => print_report(&report),
            Err(e) => {
                failed += 1;
                error!(
                    plugin = %plugin,
                    phase = e.phase().map(|phase| phase.to_string()),
                    error = %e,
                    "Plugin failed"
                );
            }
        }
    }

    worker
        .shutdown()
        .await
        .context("Namespace worker did not shut down cleanly")?;

    println!("{:-<60}", "");
    println!(
        "Total: {} plugin(s), {} succeeded, {} failed",
        plugins.len(),
        plugins.len() - failed,
        failed
    );

    Ok(())
}

fn print_report(report: &IterationReport) {
    println!("\n✅ {}", report.plugin);
    println!(
        "  🌐 {}: {}/{} (pid {})",
        report.interface, report.ip, report.prefix_len, report.pid
    );
    if !report.links.is_empty() {
        println!("  🔗 Links: {}", report.links.join(", "));
    }
    if let Some(probe) = &report.probe {
        println!("  📡 Probe: {probe}");
    }
    println!(
        "  ⏱️  Attach: {:?}, Detach: {:?}",
        report.attach, report.detach
    );
}
