//! Standard scaling fit on the training partition and shared by every model

use crate::error::{Result, ServiceError};
use serde::{Deserialize, Serialize};

/// Per-feature mean/variance normalization.
///
/// Uses the population variance. A zero-variance feature gets scale 1,
/// so it is centred but never divided by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    var: Vec<f64>,
    scale: Vec<f64>,
    n_samples_seen: usize,
}

impl StandardScaler {
    /// Fit on row-major samples.
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let n_samples = rows.len();
        if n_samples == 0 {
            return Err(ServiceError::TrainingFailure(
                "cannot fit scaler on zero samples".to_string(),
            ));
        }
        let n_features = rows[0].len();

        let mut mean = vec![0.0; n_features];
        for row in rows {
            for (m, &v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n_samples as f64;
        }

        let mut var = vec![0.0; n_features];
        for row in rows {
            for ((s, &v), &m) in var.iter_mut().zip(row).zip(&mean) {
                *s += (v - m) * (v - m);
            }
        }
        for s in &mut var {
            *s /= n_samples as f64;
        }

        let scale = var
            .iter()
            .map(|&v| {
                let std = v.sqrt();
                if std > f64::EPSILON {
                    std
                } else {
                    1.0
                }
            })
            .collect();

        if mean.iter().chain(&var).any(|v| !v.is_finite()) {
            return Err(ServiceError::TrainingFailure(
                "scaler statistics are not finite".to_string(),
            ));
        }

        Ok(Self {
            mean,
            var,
            scale,
            n_samples_seen: n_samples,
        })
    }

    /// Number of features the scaler was fit on.
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Per-feature mean.
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Per-feature population variance.
    pub fn var(&self) -> &[f64] {
        &self.var
    }

    /// Rows seen by `fit`.
    pub fn n_samples_seen(&self) -> usize {
        self.n_samples_seen
    }

    /// Reject a deserialized scaler whose statistics disagree in length or
    /// cannot be applied.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        let n = self.mean.len();
        if self.var.len() != n || self.scale.len() != n {
            return Err(format!(
                "{} means but {} variances and {} scales",
                n,
                self.var.len(),
                self.scale.len()
            ));
        }
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err("mean is not finite".to_string());
        }
        if self.scale.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err("scale must be finite and positive".to_string());
        }
        Ok(())
    }

    /// Normalize one feature vector.
    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.n_features() {
            return Err(ServiceError::ModelUnavailable(format!(
                "scaler expects {} features, got {}",
                self.n_features(),
                row.len()
            )));
        }

        Ok(row
            .iter()
            .zip(&self.mean)
            .zip(&self.scale)
            .map(|((&v, &m), &s)| (v - m) / s)
            .collect())
    }

    /// Normalize every row.
    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        rows.iter().map(|row| self.transform_row(row)).collect()
    }
}
