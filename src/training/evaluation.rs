//! Regression metrics on the held-out partition

use crate::error::{Result, ServiceError};
use serde::{Deserialize, Serialize};

/// `{mse, mae, rmse, r2}` for one model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub mse: f64,
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
}

impl ModelMetrics {
    /// Regression metrics for paired targets and estimates.
    pub fn evaluate(y_true: &[f64], y_pred: &[f64]) -> Result<Self> {
        if y_true.len() != y_pred.len() || y_true.is_empty() {
            return Err(ServiceError::TrainingFailure(format!(
                "cannot evaluate {} predictions against {} targets",
                y_pred.len(),
                y_true.len()
            )));
        }

        let n = y_true.len() as f64;
        let mean = y_true.iter().sum::<f64>() / n;

        let mut ss_res = 0.0;
        let mut abs_sum = 0.0;
        let mut ss_tot = 0.0;
        for (&t, &p) in y_true.iter().zip(y_pred) {
            ss_res += (t - p) * (t - p);
            abs_sum += (t - p).abs();
            ss_tot += (t - mean) * (t - mean);
        }

        let mse = ss_res / n;
        // Constant targets: perfect fit scores 1, anything else 0
        let r2 = if ss_tot == 0.0 {
            if ss_res == 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            1.0 - ss_res / ss_tot
        };

        let metrics = Self {
            mse,
            mae: abs_sum / n,
            rmse: mse.sqrt(),
            r2,
        };

        if [metrics.mse, metrics.mae, metrics.rmse, metrics.r2]
            .iter()
            .any(|v| !v.is_finite())
        {
            return Err(ServiceError::TrainingFailure(
                "evaluation produced non-finite metrics".to_string(),
            ));
        }

        Ok(metrics)
    }
}
