//! Bench command implementation

use anyhow::{Context, Result};
use cnibench_core::{BenchConfig, Phase, PluginId};
use cnibench_runner::{IterationOptions, NetnsWorker, TimedPhase, TimingReport};

pub async fn execute(
    config: &BenchConfig,
    plugin: &str,
    iterations: usize,
    phase: TimedPhase,
    json: bool,
    diagnostics: bool,
) -> Result<()> {
    let plugin = PluginId::new(plugin).context("Invalid plugin name")?;
    if iterations == 0 {
        anyhow::bail!("Iterations must be at least 1");
    }

    super::require_root("bench")?;

    let worker = NetnsWorker::start(config)
        .await
        .context("Failed to start namespace worker")?;

    let options = IterationOptions::timing().with_diagnostics(diagnostics);
    let result = worker.benchmark(&plugin, iterations, options).await;

    worker
        .shutdown()
        .await
        .context("Namespace worker did not shut down cleanly")?;

    let report = result.with_context(|| format!("Benchmark of {plugin} failed"))?;

    if json {
        let out = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{out}");
    } else {
        print_summary(&report, phase);
    }

    Ok(())
}

fn print_summary(report: &TimingReport, phase: TimedPhase) {
    println!(
        "\n⏱️  {} ({} iteration(s))",
        report.plugin, report.iterations
    );
    println!("{:-<60}", "");

    if phase.includes(Phase::Attach) {
        println!("  Attach: {}", report.attach_summary());
    }
    if phase.includes(Phase::Detach) {
        println!("  Detach: {}", report.detach_summary());
    }

    println!("{:-<60}", "");
    println!("Total: {:?}", report.total(phase));
}
