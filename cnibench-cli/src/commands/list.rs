//! List command implementation

use anyhow::{Context, Result};
use cnibench_cni::catalog;
use cnibench_core::BenchConfig;

pub async fn execute(config: &BenchConfig) -> Result<()> {
    tracing::debug!(conf_dir = %config.conf_dir.display(), "Listing plugins");

    let plugins = catalog::list(&config.conf_dir)
        .await
        .context("Failed to read plugin catalog")?;

    println!("\n📋 Plugins in {}", config.conf_dir.display());
    println!("{:-<60}", "");

    if plugins.is_empty() {
        println!("No plugins found");
        return Ok(());
    }

    for plugin in &plugins {
        println!("  {plugin}");
    }

    println!("{:-<60}", "");
    println!("Total: {} plugin(s)", plugins.len());

    Ok(())
}
