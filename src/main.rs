//! Car Price Service - Main Entry Point
//!
//! Loads the deployed artifacts and serves predictions, row inserts and
//! retraining over HTTP.

use anyhow::{Context, Result};
use car_price_service::{api, metrics::MetricsReporter, AppConfig, PriceService};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    config.logging.init(&["car_price_service"])?;

    info!("Starting Car Price Service");
    info!(
        models_dir = %config.paths.models_dir.display(),
        datasets_dir = %config.paths.datasets_dir.display(),
        "Configuration loaded successfully"
    );

    let service = Arc::new(
        PriceService::bootstrap(&config).context("Service failed to start")?,
    );
    if let Some(version) = service.bundle_version() {
        info!(version = %version, "Model bundle loaded");
    }

    if config.metrics.report_interval_secs > 0 {
        let reporter =
            MetricsReporter::new(service.metrics().clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    api::serve(&config.server, service.clone()).await?;

    info!("Service shutting down...");
    service.metrics().print_summary();

    Ok(())
}
