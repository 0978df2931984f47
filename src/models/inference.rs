//! Inference engine serving the current model bundle

use crate::error::{Result, ServiceError};
use crate::models::bundle::ModelBundle;
use crate::types::{FeatureVector, PricePrediction};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Holds the one current [`ModelBundle`] and swaps it as a single reference.
///
/// Readers clone the `Arc` under a short read lock and run the models outside
/// it, so an in-flight prediction always finishes on the bundle it started
/// with while a swap installs the next one.
pub struct InferenceEngine {
    current: RwLock<Option<Arc<ModelBundle>>>,
}

impl InferenceEngine {
    /// Engine with nothing loaded; every prediction fails until a swap.
    pub fn empty() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    /// Engine serving `bundle` from the start.
    pub fn with_bundle(bundle: ModelBundle) -> Self {
        info!(version = %bundle.version(), "Inference engine initialized");
        Self {
            current: RwLock::new(Some(Arc::new(bundle))),
        }
    }

    /// The bundle serving right now.
    pub fn current(&self) -> Result<Arc<ModelBundle>> {
        let guard = self
            .current
            .read()
            .map_err(|e| ServiceError::ModelUnavailable(format!("lock error: {}", e)))?;

        guard
            .clone()
            .ok_or_else(|| ServiceError::ModelUnavailable("no model bundle loaded".to_string()))
    }

    /// Version of the served bundle, if any.
    pub fn version(&self) -> Option<Uuid> {
        self.current().ok().map(|bundle| bundle.version())
    }

    pub fn is_loaded(&self) -> bool {
        self.current().is_ok()
    }

    /// Run all three models on one feature vector, returning the serving bundle's version.
    pub fn predict(&self, features: &FeatureVector) -> Result<(Uuid, PricePrediction)> {
        let bundle = self.current()?;
        let prediction = bundle.predict(features)?;

        debug!(
            version = %bundle.version(),
            lr = prediction.lr_prediction,
            xgb = prediction.xgb_prediction,
            mlp = prediction.mlp_prediction,
            "Prediction complete"
        );

        Ok((bundle.version(), prediction))
    }

    /// Install `bundle` as the current one, returning the version it replaced.
    pub fn swap(&self, bundle: ModelBundle) -> Result<Option<Uuid>> {
        let new_version = bundle.version();
        let next = Arc::new(bundle);

        let previous = {
            let mut guard = self
                .current
                .write()
                .map_err(|e| ServiceError::ModelUnavailable(format!("lock error: {}", e)))?;
            guard.replace(next)
        };
        let old_version = previous.map(|bundle| bundle.version());

        info!(
            old_version = ?old_version,
            new_version = %new_version,
            "Model bundle swapped"
        );

        Ok(old_version)
    }
}

impl Default for InferenceEngine {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use std::collections::HashMap;

    #[test]
    fn test_empty_engine_is_unavailable() {
        let engine = InferenceEngine::empty();

        assert!(!engine.is_loaded());
        assert_eq!(engine.version(), None);
        assert!(matches!(
            engine.predict(&FeatureVector::example()),
            Err(ServiceError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn test_swap_serves_new_bundle() {
        let first = test_support::fit_bundle(300, 1);
        let second = test_support::fit_bundle(300, 2);
        let (first_version, second_version) = (first.version(), second.version());
        let expected = second.predict(&FeatureVector::example()).unwrap();

        let engine = InferenceEngine::with_bundle(first);
        let replaced = engine.swap(second).unwrap();

        assert_eq!(replaced, Some(first_version));
        let (version, prediction) = engine.predict(&FeatureVector::example()).unwrap();
        assert_eq!(version, second_version);
        assert_eq!(prediction, expected);
    }

    #[test]
    fn test_concurrent_predictions_never_mix_bundles() {
        let bundles: Vec<ModelBundle> = (0..3)
            .map(|seed| test_support::fit_bundle(300, seed + 10))
            .collect();
        let expected: HashMap<Uuid, PricePrediction> = bundles
            .iter()
            .map(|b| (b.version(), b.predict(&FeatureVector::example()).unwrap()))
            .collect();

        let mut bundles = bundles.into_iter();
        let engine = InferenceEngine::with_bundle(bundles.next().unwrap());

        std::thread::scope(|scope| {
            let readers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        for _ in 0..200 {
                            let (version, prediction) =
                                engine.predict(&FeatureVector::example()).unwrap();
                            assert_eq!(expected[&version], prediction);
                        }
                    })
                })
                .collect();

            for bundle in bundles {
                engine.swap(bundle).unwrap();
            }
            for reader in readers {
                reader.join().unwrap();
            }
        });
    }
}
