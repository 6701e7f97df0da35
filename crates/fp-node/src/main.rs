//! Finality provider signature tracker node.

use anyhow::{Context, Result};
use fp_node::{NodeConfig, NodeRuntime};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::from_env().context("Invalid configuration")?;
    let _telemetry = fp_telemetry::init_telemetry(config.telemetry.clone())
        .context("Failed to initialize telemetry")?;

    let runtime = Arc::new(NodeRuntime::new(config)?);

    let signal = Arc::clone(&runtime);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received");
        }
        signal.shutdown();
    });

    runtime.run().await?;
    info!("Shutdown complete");
    Ok(())
}
