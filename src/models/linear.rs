//! Ordinary least squares regression

use crate::error::{Result, ServiceError};
use serde::{Deserialize, Serialize};

/// Linear regression with an intercept, fit by solving the centred normal equations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegression {
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LinearRegression {
    /// Fit on row-major `x` against `y`.
    pub fn fit(x: &[Vec<f64>], y: &[f64]) -> Result<Self> {
        if x.len() != y.len() {
            return Err(ServiceError::TrainingFailure(format!(
                "linear regression got {} rows but {} targets",
                x.len(),
                y.len()
            )));
        }
        if x.is_empty() {
            return Err(ServiceError::TrainingFailure(
                "cannot fit linear regression on zero samples".to_string(),
            ));
        }

        let n = x.len() as f64;
        let p = x[0].len();

        let mut x_mean = vec![0.0; p];
        for row in x {
            for (m, &v) in x_mean.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let y_mean = y.iter().sum::<f64>() / n;

        // Gram matrix and moment vector of the centred data
        let mut gram = vec![vec![0.0; p]; p];
        let mut moment = vec![0.0; p];
        for (row, &target) in x.iter().zip(y) {
            let centred: Vec<f64> = row.iter().zip(&x_mean).map(|(v, m)| v - m).collect();
            let dy = target - y_mean;
            for i in 0..p {
                moment[i] += centred[i] * dy;
                for j in i..p {
                    gram[i][j] += centred[i] * centred[j];
                }
            }
        }
        for i in 0..p {
            for j in 0..i {
                gram[i][j] = gram[j][i];
            }
        }

        let coefficients = solve_least_squares(gram, moment);
        let intercept = y_mean
            - coefficients
                .iter()
                .zip(&x_mean)
                .map(|(c, m)| c * m)
                .sum::<f64>();

        if !intercept.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
            return Err(ServiceError::TrainingFailure(
                "linear regression coefficients diverged".to_string(),
            ));
        }

        Ok(Self {
            coefficients,
            intercept,
        })
    }

    /// Fitted slope per feature.
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Fitted intercept.
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Number of input features.
    pub fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    /// Reject deserialized parameters that are not finite.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        if !self.intercept.is_finite() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err("coefficients must be finite".to_string());
        }
        Ok(())
    }

    /// Estimate for one row.
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(row)
                .map(|(c, v)| c * v)
                .sum::<f64>()
    }

    /// Estimates for every row.
    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }
}

/// Gauss-Jordan elimination with partial pivoting.
///
/// Columns whose pivot vanishes are left free and get a zero coefficient, so a
/// constant or collinear feature does not make the fit fail.
fn solve_least_squares(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Vec<f64> {
    let p = b.len();
    let max_diag = (0..p).map(|i| a[i][i].abs()).fold(0.0, f64::max);
    let tolerance = max_diag * 1e-12;

    let mut pivot_row_of = vec![None; p];
    let mut row = 0;

    for col in 0..p {
        if row == p {
            break;
        }

        let (best, best_abs) = (row..p)
            .map(|r| (r, a[r][col].abs()))
            .fold((row, -1.0), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
        if best_abs <= tolerance {
            continue;
        }

        a.swap(row, best);
        b.swap(row, best);

        let pivot = a[row][col];
        for v in a[row].iter_mut() {
            *v /= pivot;
        }
        b[row] /= pivot;

        let pivot_values = a[row].clone();
        let pivot_rhs = b[row];
        for r in 0..p {
            if r == row {
                continue;
            }
            let factor = a[r][col];
            if factor == 0.0 {
                continue;
            }
            for (v, pv) in a[r].iter_mut().zip(&pivot_values) {
                *v -= factor * pv;
            }
            b[r] -= factor * pivot_rhs;
        }

        pivot_row_of[col] = Some(row);
        row += 1;
    }

    pivot_row_of
        .into_iter()
        .map(|r| r.map(|r| b[r]).unwrap_or(0.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovers_exact_linear_relation() {
        let x: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![i as f64, ((i * 7) % 5) as f64])
            .collect();
        let y: Vec<f64> = x.iter().map(|r| 3.0 + 2.0 * r[0] - 0.5 * r[1]).collect();

        let model = LinearRegression::fit(&x, &y).unwrap();

        assert!((model.intercept() - 3.0).abs() < 1e-9);
        assert!((model.coefficients()[0] - 2.0).abs() < 1e-9);
        assert!((model.coefficients()[1] + 0.5).abs() < 1e-9);
        assert!((model.predict_row(&[10.0, 2.0]) - 22.0).abs() < 1e-9);
    }

    #[test]
    fn test_constant_feature_gets_zero_coefficient() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64, 4.0]).collect();
        let y: Vec<f64> = x.iter().map(|r| 1.0 + r[0]).collect();

        let model = LinearRegression::fit(&x, &y).unwrap();

        assert_eq!(model.coefficients()[1], 0.0);
        assert!((model.coefficients()[0] - 1.0).abs() < 1e-9);
        assert!((model.intercept() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_columns_do_not_fail() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64, i as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| 2.0 * r[0]).collect();

        let model = LinearRegression::fit(&x, &y).unwrap();
        let predictions = model.predict(&x);

        for (p, t) in predictions.iter().zip(&y) {
            assert!((p - t).abs() < 1e-9);
        }
    }

    #[test]
    fn test_mismatched_lengths() {
        assert!(LinearRegression::fit(&[vec![1.0]], &[1.0, 2.0]).is_err());
        assert!(LinearRegression::fit(&[], &[]).is_err());
    }
}
