//! Price service: wires the schema, the inference engine, the accumulator
//! and the retraining pipeline behind request-sized operations.

use crate::config::AppConfig;
use crate::dataset::{write_table, DatasetAccumulator, Table};
use crate::error::{Result, SchemaError, ServiceError};
use crate::feature_schema::FeatureSchema;
use crate::label_codec::{LabelCodec, LabelMappings};
use crate::metrics::ServiceMetrics;
use crate::models::{ArtifactStore, InferenceEngine};
use crate::training::{
    fit_models, CorpusSource, RetrainOptions, RetrainReport, RetrainingPipeline, TrainedModels,
};
use crate::types::PricePrediction;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Validation, the served bundle, the accumulator and retraining behind one handle.
pub struct PriceService {
    schema: FeatureSchema,
    engine: Arc<InferenceEngine>,
    accumulator: Arc<DatasetAccumulator>,
    pipeline: Arc<RetrainingPipeline>,
    metrics: Arc<ServiceMetrics>,
    original_dataset: PathBuf,
}

impl PriceService {
    /// Load every startup artifact. Any missing or inconsistent file is a
    /// `StartupConfig` error naming it.
    pub fn bootstrap(config: &AppConfig) -> Result<Self> {
        let store = ArtifactStore::new(&config.paths.models_dir);
        store.check_required()?;
        store.check_feature_columns()?;
        let codec = store.load_codec()?;
        let bundle = store.load_bundle()?;

        warn!(
            "Tree ensemble is fit on unscaled features but served scaled vectors; \
             its estimates are kept for parity with the deployed artifacts"
        );

        let original_dataset = config.paths.original_dataset();
        if !original_dataset.exists() {
            warn!(
                path = %original_dataset.display(),
                "Original dataset not found; retraining will fail until it exists"
            );
        }

        let accumulator = Arc::new(DatasetAccumulator::new(config.paths.accumulated_dataset()));
        accumulator.ensure_exists()?;

        let engine = Arc::new(InferenceEngine::with_bundle(bundle));
        let pipeline = Arc::new(RetrainingPipeline::new(
            config.training.clone(),
            store,
            engine.clone(),
            accumulator.clone(),
            config.paths.combined_dataset(),
        ));

        info!(
            models_dir = %config.paths.models_dir.display(),
            datasets_dir = %config.paths.datasets_dir.display(),
            "Price service ready"
        );

        Ok(Self {
            schema: FeatureSchema::new(Arc::new(codec)),
            engine,
            accumulator,
            pipeline,
            metrics: Arc::new(ServiceMetrics::new()),
            original_dataset,
        })
    }

    /// Pin the reference year used for `year` validation.
    pub fn with_current_year(mut self, year: i64) -> Self {
        self.schema = self.schema.with_current_year(year);
        self
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Engine holding the served bundle.
    pub fn engine(&self) -> &Arc<InferenceEngine> {
        &self.engine
    }

    pub fn accumulator(&self) -> &Arc<DatasetAccumulator> {
        &self.accumulator
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    pub fn label_mappings(&self) -> &LabelMappings {
        self.schema.codec().mappings()
    }

    /// Version of the bundle answering predictions.
    pub fn bundle_version(&self) -> Option<Uuid> {
        self.engine.version()
    }

    /// Validate a request body and run all three models.
    pub fn predict_raw(&self, raw: &Value) -> Result<(Uuid, PricePrediction)> {
        let started = Instant::now();
        let result = as_object(raw)
            .and_then(|body| self.schema.validate(body).map_err(ServiceError::from))
            .and_then(|features| self.engine.predict(&features));

        match &result {
            Ok((version, prediction)) => {
                self.metrics.record_prediction(started.elapsed(), prediction);
                debug!(version = %version, "Price predicted");
            }
            Err(e) => {
                self.metrics.record_prediction_failure();
                debug!(error = %e, "Prediction rejected");
            }
        }
        result
    }

    /// Validate a training row and append it to the accumulated dataset.
    pub fn insert_raw(&self, raw: &Value) -> Result<()> {
        let result = as_object(raw)
            .and_then(|body| self.schema.validate_labeled(body).map_err(ServiceError::from))
            .and_then(|example| self.accumulator.append(&example));

        self.metrics.record_insert(result.is_ok());
        match &result {
            Ok(()) => info!(path = %self.accumulator.path().display(), "Training row inserted"),
            Err(e) if e.is_client_error() => debug!(error = %e, "Training row rejected"),
            Err(e) => error!(error = %e, "Failed to insert training row"),
        }
        result
    }

    /// Retrain from the original and accumulated datasets on the blocking pool.
    pub async fn retrain(&self, options: RetrainOptions) -> Result<RetrainReport> {
        let pipeline = self.pipeline.clone();
        let sources = vec![
            CorpusSource::File(self.original_dataset.clone()),
            CorpusSource::Accumulated,
        ];

        let result = tokio::task::spawn_blocking(move || pipeline.retrain(&sources, &options))
            .await
            .unwrap_or_else(|e| {
                Err(ServiceError::TrainingFailure(format!(
                    "retrain task failed: {}",
                    e
                )))
            });

        self.metrics.record_retrain(result.is_ok());
        if let Err(e) = &result {
            error!(error = %e, "Retrain failed");
        }
        result
    }
}

fn as_object(raw: &Value) -> Result<&Map<String, Value>> {
    raw.as_object().ok_or_else(|| {
        SchemaError::new()
            .with("body", "expected a JSON object")
            .into()
    })
}

/// Write a fresh deployment: label mappings, the original dataset and a full
/// artifact set fit on it.
pub fn bootstrap_artifacts(config: &AppConfig, corpus: &Table) -> Result<TrainedModels> {
    let store = ArtifactStore::new(&config.paths.models_dir);
    store.save_codec(&LabelCodec::standard())?;

    std::fs::create_dir_all(&config.paths.datasets_dir)
        .map_err(|e| ServiceError::io(&config.paths.datasets_dir, e))?;
    write_table(config.paths.original_dataset(), corpus)?;

    let trained = fit_models(corpus, &config.training, true)?;
    store.save(&trained.bundle)?;

    info!(
        version = %trained.bundle.version(),
        rows = corpus.len(),
        "Deployment bootstrapped"
    );
    Ok(trained)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::store::{NETWORK_MODEL_FILE, SCALER_FILE};
    use crate::synthetic::CorpusGenerator;
    use crate::test_support;
    use crate::types::FeatureVector;
    use serde_json::json;

    pub(crate) fn deployment(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.paths.models_dir = dir.join("trained_models");
        config.paths.datasets_dir = dir.join("datasets");
        config.training = test_support::training_config();

        bootstrap_artifacts(&config, &test_support::corpus(600, 31)).unwrap();
        config
    }

    pub(crate) fn example_body() -> Value {
        serde_json::to_value(FeatureVector::example()).unwrap()
    }

    #[test]
    fn test_bootstrap_fails_naming_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = deployment(dir.path());
        std::fs::remove_file(config.paths.models_dir.join(SCALER_FILE)).unwrap();

        match PriceService::bootstrap(&config) {
            Err(ServiceError::StartupConfig(message)) => assert!(message.contains(SCALER_FILE)),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_bootstrap_creates_accumulated_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let config = deployment(dir.path());

        let service = PriceService::bootstrap(&config).unwrap();
        assert!(config.paths.accumulated_dataset().exists());
        assert!(service.accumulator().snapshot().unwrap().is_empty());
        assert!(service.bundle_version().is_some());
        assert_eq!(service.label_mappings()["fuel_type"]["Gasoline"], 5);
    }

    #[test]
    fn test_example_prediction_in_range() {
        let dir = tempfile::tempdir().unwrap();
        let service = PriceService::bootstrap(&deployment(dir.path()))
            .unwrap()
            .with_current_year(2026);

        let (_, prediction) = service.predict_raw(&example_body()).unwrap();

        assert!(prediction.is_finite());
        assert!((9.0..11.0).contains(&prediction.lr_prediction), "{prediction:?}");
        assert!((9.0..11.0).contains(&prediction.mlp_prediction), "{prediction:?}");
        // Trees see scaled inputs they were not fit on
        assert!((7.5..12.0).contains(&prediction.xgb_prediction), "{prediction:?}");
        assert_eq!(service.metrics().snapshot().predictions, 1);
    }

    #[test]
    fn test_request_predictions_finite_across_generated_and_boundary_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let service = PriceService::bootstrap(&deployment(dir.path()))
            .unwrap()
            .with_current_year(2026);

        let mut bodies: Vec<Value> = CorpusGenerator::new(97)
            .examples(300)
            .iter()
            .map(|example| serde_json::to_value(&example.features).unwrap())
            .collect();
        for (field, value) in [
            ("year", json!(1900)),
            ("year", json!(2027)),
            ("mileage", json!(0)),
            ("mileage", json!(1.0e9)),
            ("horsepower", json!(1.0e6)),
            ("size_of_vehicle", json!(0.0)),
        ] {
            let mut body = example_body();
            body[field] = value;
            bodies.push(body);
        }

        for body in &bodies {
            let (_, prediction) = service.predict_raw(body).unwrap();
            assert!(prediction.is_finite(), "{body} -> {prediction:?}");
        }
        assert_eq!(service.metrics().snapshot().predictions, bodies.len() as u64);
    }

    #[test]
    fn test_invalid_body_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service = PriceService::bootstrap(&deployment(dir.path()))
            .unwrap()
            .with_current_year(2026);

        let mut body = example_body();
        body["year"] = json!(1800);
        body["mileage"] = json!(-5);
        match service.predict_raw(&body) {
            Err(ServiceError::Schema(schema)) => {
                assert!(schema.mentions("year") && schema.mentions("mileage"))
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(service.predict_raw(&json!([1, 2, 3])).is_err());
        assert_eq!(service.metrics().snapshot().prediction_failures, 2);
    }

    #[test]
    fn test_insert_requires_price() {
        let dir = tempfile::tempdir().unwrap();
        let service = PriceService::bootstrap(&deployment(dir.path()))
            .unwrap()
            .with_current_year(2026);

        assert!(service.insert_raw(&example_body()).is_err());

        let mut body = example_body();
        body["price"] = json!(10.2);
        service.insert_raw(&body).unwrap();
        assert_eq!(service.accumulator().snapshot().unwrap().targets(), vec![10.2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_inserts_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(
            PriceService::bootstrap(&deployment(dir.path()))
                .unwrap()
                .with_current_year(2026),
        );

        let tasks: Vec<_> = (0..100)
            .map(|i| {
                let service = service.clone();
                tokio::task::spawn_blocking(move || {
                    let mut body = example_body();
                    body["price"] = json!(9.0 + i as f64 / 1000.0);
                    service.insert_raw(&body)
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(service.accumulator().snapshot().unwrap().len(), 100);
        assert_eq!(service.metrics().snapshot().rows_inserted, 100);
    }

    #[tokio::test]
    async fn test_retrain_is_reproducible_and_swaps() {
        let dir = tempfile::tempdir().unwrap();
        let service = PriceService::bootstrap(&deployment(dir.path()))
            .unwrap()
            .with_current_year(2026);
        let before = service.bundle_version();

        let first = service.retrain(RetrainOptions::default()).await.unwrap();
        let second = service.retrain(RetrainOptions::default()).await.unwrap();

        assert_eq!(first.metrics, second.metrics);
        assert_ne!(Some(first.version), before);
        assert_eq!(service.bundle_version(), Some(second.version));

        let (version, _) = service.predict_raw(&example_body()).unwrap();
        assert_eq!(version, second.version);
        assert_eq!(service.metrics().snapshot().retrains, 2);
    }

    #[tokio::test]
    async fn test_retrain_without_network_then_restore() {
        let dir = tempfile::tempdir().unwrap();
        let config = deployment(dir.path());
        let service = PriceService::bootstrap(&config).unwrap().with_current_year(2026);

        let options = RetrainOptions {
            train_mlp: false,
            ..RetrainOptions::default()
        };
        service.retrain(options).await.unwrap();
        assert!(matches!(
            service.predict_raw(&example_body()),
            Err(ServiceError::ModelUnavailable(_))
        ));
        assert!(!config.paths.models_dir.join(NETWORK_MODEL_FILE).exists());

        service.retrain(RetrainOptions::default()).await.unwrap();
        assert!(service.predict_raw(&example_body()).is_ok());
    }
}
