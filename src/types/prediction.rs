//! Prediction response data structures

use serde::{Deserialize, Serialize};

/// Point estimates from the three regressors, all computed from one scaled vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePrediction {
    /// Linear regression estimate
    pub lr_prediction: f64,
    /// Gradient-boosted trees estimate
    pub xgb_prediction: f64,
    /// Feed-forward network estimate
    pub mlp_prediction: f64,
}

impl PricePrediction {
    /// (model name, estimate) pairs in response order.
    pub fn by_model(&self) -> [(&'static str, f64); 3] {
        [
            ("linear_regression", self.lr_prediction),
            ("xgboost", self.xgb_prediction),
            ("mlp", self.mlp_prediction),
        ]
    }

    /// Whether all three estimates are finite.
    pub fn is_finite(&self) -> bool {
        self.by_model().iter().all(|(_, v)| v.is_finite())
    }

    /// Mean of the three estimates.
    pub fn mean(&self) -> f64 {
        (self.lr_prediction + self.xgb_prediction + self.mlp_prediction) / 3.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_serialization() {
        let prediction = PricePrediction {
            lr_prediction: 10.1,
            xgb_prediction: 10.3,
            mlp_prediction: 9.9,
        };

        let json = serde_json::to_value(prediction).unwrap();
        assert_eq!(json["lr_prediction"], 10.1);
        assert_eq!(json["xgb_prediction"], 10.3);
        assert_eq!(json["mlp_prediction"], 9.9);

        let back: PricePrediction = serde_json::from_value(json).unwrap();
        assert_eq!(back, prediction);
        assert!((prediction.mean() - 10.1).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_detected() {
        let prediction = PricePrediction {
            lr_prediction: 10.0,
            xgb_prediction: f64::NAN,
            mlp_prediction: 10.0,
        };
        assert!(!prediction.is_finite());
        assert_eq!(prediction.by_model()[1].0, "xgboost");
    }
}
