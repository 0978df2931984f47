//! Seed Corpus Tool
//!
//! Writes a synthetic original dataset, the label mappings and an initial
//! artifact set so the service has something to start from.
//!
//! Usage: seed-corpus [rows] [seed]

use anyhow::{Context, Result};
use car_price_service::dataset::Table;
use car_price_service::service::bootstrap_artifacts;
use car_price_service::synthetic::CorpusGenerator;
use car_price_service::AppConfig;
use tracing::info;

const DEFAULT_ROWS: usize = 5_000;
const DEFAULT_SEED: u64 = 31;

fn main() -> Result<()> {
    let config = AppConfig::load()?;
    config.logging.init(&["car_price_service", "seed_corpus"])?;

    let args: Vec<String> = std::env::args().collect();
    let rows: usize = match args.get(1) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid row count '{}'", raw))?,
        None => DEFAULT_ROWS,
    };
    let seed: u64 = match args.get(2) {
        Some(raw) => raw.parse().with_context(|| format!("invalid seed '{}'", raw))?,
        None => DEFAULT_SEED,
    };

    info!(rows, seed, "Generating synthetic corpus");
    let corpus = Table::from_examples(&CorpusGenerator::new(seed).examples(rows));

    let trained = bootstrap_artifacts(&config, &corpus).context("Bootstrap failed")?;

    for (model, metrics) in [
        ("linear_regression", trained.metrics.linear_regression),
        ("xgboost", trained.metrics.xgboost),
        ("mlp", trained.metrics.mlp),
    ] {
        info!(
            model,
            rmse = metrics.rmse,
            r2 = metrics.r2,
            "Held-out metrics"
        );
    }
    info!(
        version = %trained.bundle.version(),
        models_dir = %config.paths.models_dir.display(),
        original_dataset = %config.paths.original_dataset().display(),
        "Seed complete"
    );

    Ok(())
}
