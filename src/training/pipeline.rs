//! Retraining pipeline.
//!
//! Loads the corpus, refits the scaler and all three models on a seeded
//! split, evaluates them on the held-out rows, then persists and swaps the
//! new bundle. Nothing served or stored changes until every model has been
//! fit and evaluated.

use crate::config::TrainingConfig;
use crate::dataset::{load_table, stage_table, DatasetAccumulator, Table};
use crate::error::{Result, ServiceError};
use crate::models::{
    ArtifactStore, FeedForwardNetwork, GradientBoostedTrees, InferenceEngine, LinearRegression,
    ModelBundle,
};
use crate::scaler::StandardScaler;
use crate::training::evaluation::ModelMetrics;
use crate::training::split::train_test_split;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// What a retrain should do besides fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrainOptions {
    /// Overwrite the on-disk artifacts
    pub save_models: bool,
    /// Swap the new bundle into the inference engine
    pub update_models_in_memory: bool,
    /// Write the merged corpus snapshot
    pub save_combined_dataset: bool,
    /// Fit the neural network; when false its metrics are zero and the bundle has none
    pub train_mlp: bool,
}

impl Default for RetrainOptions {
    fn default() -> Self {
        Self {
            save_models: true,
            update_models_in_memory: true,
            save_combined_dataset: true,
            train_mlp: true,
        }
    }
}

/// Where a slice of the corpus comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorpusSource {
    /// A dataset file read directly
    File(PathBuf),
    /// The accumulated dataset, read under the accumulator's lock
    Accumulated,
}

/// Held-out metrics per model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrainMetrics {
    pub linear_regression: ModelMetrics,
    pub xgboost: ModelMetrics,
    pub mlp: ModelMetrics,
}

/// A freshly fit bundle with its evaluation.
#[derive(Debug, Clone)]
pub struct TrainedModels {
    pub bundle: ModelBundle,
    pub metrics: RetrainMetrics,
    pub train_rows: usize,
    pub test_rows: usize,
}

/// Outcome of a completed retrain.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrainReport {
    pub version: Uuid,
    pub metrics: RetrainMetrics,
    pub train_rows: usize,
    pub test_rows: usize,
    pub swapped: bool,
    pub saved: bool,
}

/// Fit the scaler and the model trio on one corpus.
///
/// The scaler is fit on the train partition only. Linear regression and the
/// network see scaled features; the tree ensemble is fit and evaluated on
/// raw features.
pub fn fit_models(corpus: &Table, config: &TrainingConfig, train_mlp: bool) -> Result<TrainedModels> {
    let x = corpus.features();
    let y = corpus.targets();
    let split = train_test_split(corpus.len(), config.test_size, config.seed)?;

    let pick = |rows: &[usize]| -> (Vec<Vec<f64>>, Vec<f64>) {
        (
            rows.iter().map(|&i| x[i].clone()).collect(),
            rows.iter().map(|&i| y[i]).collect(),
        )
    };
    let (x_train, y_train) = pick(&split.train);
    let (x_test, y_test) = pick(&split.test);

    let scaler = StandardScaler::fit(&x_train)?;
    let x_train_scaled = scaler.transform(&x_train)?;
    let x_test_scaled = scaler.transform(&x_test)?;

    let started = Instant::now();
    let linear = LinearRegression::fit(&x_train_scaled, &y_train)?;
    let linear_metrics = ModelMetrics::evaluate(&y_test, &linear.predict(&x_test_scaled))?;
    info!(
        model = "linear_regression",
        r2 = linear_metrics.r2,
        rmse = linear_metrics.rmse,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Model trained"
    );

    let started = Instant::now();
    let boosting = GradientBoostedTrees::fit(&x_train, &y_train, &config.boosting)?;
    let boosting_metrics = ModelMetrics::evaluate(&y_test, &boosting.predict(&x_test))?;
    info!(
        model = "xgboost",
        r2 = boosting_metrics.r2,
        rmse = boosting_metrics.rmse,
        trees = boosting.n_trees(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Model trained"
    );

    let (network, network_metrics) = if train_mlp {
        let started = Instant::now();
        let (network, history) =
            FeedForwardNetwork::fit(&x_train_scaled, &y_train, &config.network, config.seed)?;
        let metrics = ModelMetrics::evaluate(&y_test, &network.predict(&x_test_scaled))?;
        info!(
            model = "mlp",
            r2 = metrics.r2,
            rmse = metrics.rmse,
            epochs = history.epochs_run(),
            best_epoch = history.best_epoch,
            stopped_early = history.stopped_early,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model trained"
        );
        (Some(network), metrics)
    } else {
        info!(model = "mlp", "Network training skipped");
        (None, ModelMetrics::default())
    };

    let bundle = ModelBundle::new(scaler, linear, boosting, network)?;

    Ok(TrainedModels {
        bundle,
        metrics: RetrainMetrics {
            linear_regression: linear_metrics,
            xgboost: boosting_metrics,
            mlp: network_metrics,
        },
        train_rows: split.train.len(),
        test_rows: split.test.len(),
    })
}

/// Runs retrains against one artifact store and inference engine.
pub struct RetrainingPipeline {
    config: TrainingConfig,
    store: ArtifactStore,
    engine: Arc<InferenceEngine>,
    accumulator: Arc<DatasetAccumulator>,
    combined_dataset: PathBuf,
    running: Mutex<()>,
}

impl RetrainingPipeline {
    /// Pipeline writing to `store` and `combined_dataset` and swapping into `engine`.
    pub fn new(
        config: TrainingConfig,
        store: ArtifactStore,
        engine: Arc<InferenceEngine>,
        accumulator: Arc<DatasetAccumulator>,
        combined_dataset: PathBuf,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            accumulator,
            combined_dataset,
            running: Mutex::new(()),
        }
    }

    /// Hyperparameters used by every retrain.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Full retrain over `sources`. Blocking; one retrain runs at a time.
    ///
    /// Overwrites the current artifacts with no history: the last successful
    /// retrain wins. Any load, schema, training or staging error returns
    /// before the store, the combined dataset or the engine is touched. The
    /// in-memory swap happens only after every file is in place.
    pub fn retrain(&self, sources: &[CorpusSource], options: &RetrainOptions) -> Result<RetrainReport> {
        let _running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let started = Instant::now();
        info!(sources = sources.len(), options = ?options, "Retrain started");

        let corpus = self.load_corpus(sources)?;
        if corpus.is_empty() {
            return Err(ServiceError::TrainingFailure(
                "corpus has no complete rows".to_string(),
            ));
        }

        let trained = fit_models(&corpus, &self.config, options.train_mlp)?;
        let version = trained.bundle.version();

        // Every write is staged before anything is replaced
        let staged_models = if options.save_models {
            Some(self.store.stage(&trained.bundle)?)
        } else {
            None
        };
        let staged_dataset = if options.save_combined_dataset {
            Some(stage_table(&self.combined_dataset, &corpus)?)
        } else {
            None
        };

        if let Some(dataset) = staged_dataset {
            dataset.commit()?;
        }
        if let Some(models) = staged_models {
            models.commit()?;
        }
        if options.update_models_in_memory {
            self.engine.swap(trained.bundle)?;
        } else {
            warn!(version = %version, "New bundle not swapped into memory");
        }

        info!(
            version = %version,
            rows = corpus.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Retrain complete"
        );

        Ok(RetrainReport {
            version,
            metrics: trained.metrics,
            train_rows: trained.train_rows,
            test_rows: trained.test_rows,
            swapped: options.update_models_in_memory,
            saved: options.save_models,
        })
    }

    fn load_corpus(&self, sources: &[CorpusSource]) -> Result<Table> {
        let tables = sources
            .iter()
            .map(|source| match source {
                CorpusSource::File(path) => load_table(path),
                CorpusSource::Accumulated => self.accumulator.snapshot(),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Table::concat(tables))
    }
}
