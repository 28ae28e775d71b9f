//! # Courier Dispatch Service
//!
//! Loads configuration for the detected environment, starts every worker pool
//! and the periodic scheduler, and drains them on Ctrl-C.

use anyhow::Context;
use tracing::info;

use courier_core::bootstrap::DispatchSystem;
use courier_core::config::ConfigManager;
use courier_core::logging::init_structured_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_manager = ConfigManager::global().context("failed to load configuration")?;
    init_structured_logging(
        &config_manager.config().logging,
        config_manager.environment(),
    );
    info!(config = %config_manager.redacted(), "Configuration loaded");

    let system = DispatchSystem::bootstrap(config_manager)
        .await
        .context("failed to start dispatch system")?;
    info!(status = ?system.status(), "Courier running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    let report = system.shutdown().await;
    info!(
        pools = report.pools.len(),
        scheduled_events = report.scheduled_events,
        "Courier stopped"
    );
    Ok(())
}
