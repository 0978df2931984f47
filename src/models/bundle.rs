//! One immutable, versioned set of scaler and models.

use crate::error::{Result, ServiceError};
use crate::models::boosting::GradientBoostedTrees;
use crate::models::linear::LinearRegression;
use crate::models::network::FeedForwardNetwork;
use crate::scaler::StandardScaler;
use crate::types::{FeatureVector, PricePrediction};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Scaler plus the model trio that was fit against it.
///
/// A bundle is never mutated after construction. Replacing any part means
/// building a new bundle, which keeps every model paired with its own scaler.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    version: Uuid,
    created_at: DateTime<Utc>,
    scaler: StandardScaler,
    linear: LinearRegression,
    boosting: GradientBoostedTrees,
    network: Option<FeedForwardNetwork>,
}

impl ModelBundle {
    /// Assemble a bundle after checking every model is internally consistent and
    /// agrees on the feature width.
    pub fn new(
        scaler: StandardScaler,
        linear: LinearRegression,
        boosting: GradientBoostedTrees,
        network: Option<FeedForwardNetwork>,
    ) -> Result<Self> {
        let mut checks = vec![
            ("scaler", scaler.check_consistency()),
            ("linear_regression", linear.check_consistency()),
            ("xgboost", boosting.check_consistency()),
        ];
        if let Some(network) = &network {
            checks.push(("mlp", network.check_consistency()));
        }
        for (part, check) in checks {
            if let Err(problem) = check {
                return Err(ServiceError::ModelUnavailable(format!(
                    "{} artifact is inconsistent: {}",
                    part, problem
                )));
            }
        }

        let expected = scaler.n_features();
        let mut widths = vec![
            ("linear_regression", linear.n_features()),
            ("xgboost", boosting.n_features()),
        ];
        if let Some(network) = &network {
            widths.push(("mlp", network.n_features()));
        }
        for (model, width) in widths {
            if width != expected {
                return Err(ServiceError::ModelUnavailable(format!(
                    "{} expects {} features but the scaler has {}",
                    model, width, expected
                )));
            }
        }

        Ok(Self {
            version: Uuid::new_v4(),
            created_at: Utc::now(),
            scaler,
            linear,
            boosting,
            network,
        })
    }

    /// Identifier assigned when the bundle was assembled.
    pub fn version(&self) -> Uuid {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn linear(&self) -> &LinearRegression {
        &self.linear
    }

    pub fn boosting(&self) -> &GradientBoostedTrees {
        &self.boosting
    }

    /// `None` when the last retrain skipped the network.
    pub fn network(&self) -> Option<&FeedForwardNetwork> {
        self.network.as_ref()
    }

    /// Scale once, then feed the same vector to every model.
    ///
    /// The tree ensemble is fit on unscaled features yet receives the scaled
    /// vector here, matching how the deployed artifacts have always been served.
    pub fn predict(&self, features: &FeatureVector) -> Result<PricePrediction> {
        let network = self.network.as_ref().ok_or_else(|| {
            ServiceError::ModelUnavailable(
                "neural network artifact is not part of the current bundle".to_string(),
            )
        })?;

        let scaled = self.scaler.transform_row(&features.to_row())?;
        let prediction = PricePrediction {
            lr_prediction: self.linear.predict_row(&scaled),
            xgb_prediction: self.boosting.predict_row(&scaled),
            mlp_prediction: network.predict_row(&scaled),
        };

        let non_finite = prediction
            .by_model()
            .into_iter()
            .find(|(_, value)| !value.is_finite());
        if let Some((model, _)) = non_finite {
            return Err(ServiceError::NonFiniteEstimate {
                model: model.to_string(),
                version: self.version.to_string(),
            });
        }

        Ok(prediction)
    }
}
