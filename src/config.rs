//! Configuration management for the price estimation service

use crate::dataset::{ACCUMULATED_DATASET_FILE, COMBINED_DATASET_FILE, ORIGINAL_DATASET_FILE};
use crate::models::{BoostingParams, NetworkParams};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming an alternative configuration file
pub const CONFIG_PATH_ENV: &str = "CAR_PRICE_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Artifact and dataset locations
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the model artifacts, schema and label mappings
    pub models_dir: PathBuf,
    /// Directory holding the original, accumulated and combined datasets
    pub datasets_dir: PathBuf,
}

impl PathsConfig {
    pub fn original_dataset(&self) -> PathBuf {
        self.datasets_dir.join(ORIGINAL_DATASET_FILE)
    }

    /// Rows inserted through the API.
    pub fn accumulated_dataset(&self) -> PathBuf {
        self.datasets_dir.join(ACCUMULATED_DATASET_FILE)
    }

    /// Snapshot of the last retrain corpus.
    pub fn combined_dataset(&self) -> PathBuf {
        self.datasets_dir.join(COMBINED_DATASET_FILE)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("trained_models"),
            datasets_dir: PathBuf::from("datasets"),
        }
    }
}

/// Retraining settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    /// Fraction of rows held out for evaluation
    pub test_size: f64,
    /// Seed for the split and the network
    pub seed: u64,
    pub boosting: BoostingParams,
    pub network: NetworkParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            seed: 31,
            boosting: BoostingParams::default(),
            network: NetworkParams::default(),
        }
    }
}

/// Periodic metrics summary
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Seconds between summaries (0 disables the reporter)
    pub report_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 60,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Install the global subscriber with `<target>=<level>` for each target.
    pub fn init(&self, targets: &[&str]) -> Result<()> {
        let mut filter = tracing_subscriber::EnvFilter::from_default_env();
        for target in targets {
            filter = filter.add_directive(format!("{}={}", target, self.level).parse()?);
        }

        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        let installed = if self.format == "json" {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        installed.map_err(|e| anyhow::anyhow!(e))
    }
}

impl AppConfig {
    /// Load from `$CAR_PRICE_CONFIG`, falling back to `config/config.toml`
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load from a specific file, then apply `CAR_PRICE_<SECTION>__<KEY>` overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("CAR_PRICE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind_addr(), "127.0.0.1:8000");
        assert_eq!(config.training.test_size, 0.2);
        assert_eq!(config.training.seed, 31);
        assert_eq!(config.training.boosting.n_estimators, 512);
        assert_eq!(config.training.network.hidden_layers, vec![64, 32]);
        assert_eq!(
            config.paths.accumulated_dataset(),
            PathBuf::from("datasets/additional_dataset.csv")
        );
    }

    #[test]
    fn test_shipped_file_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/config.toml");
        let config = AppConfig::load_from_path(path).unwrap();
        let defaults = AppConfig::default();

        assert_eq!(config.training, defaults.training);
        assert_eq!(config.server.port, defaults.server.port);
        assert_eq!(config.paths.models_dir, defaults.paths.models_dir);
        assert_eq!(config.metrics.report_interval_secs, 60);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[training]\nseed = 7\n[training.network]\nepochs = 50\n").unwrap();

        let config = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(config.training.seed, 7);
        assert_eq!(config.training.network.epochs, 50);
        assert_eq!(config.training.network.batch_size, 512);
        assert_eq!(config.training.boosting, BoostingParams::default());
        assert_eq!(config.logging.format, "pretty");
    }
}
