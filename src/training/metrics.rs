//! Regression scoring functions
//!
//! Multi-output targets are scored per column and averaged uniformly.

use crate::error::{DatamodelerError, Result};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scoring function selectable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Coefficient of determination
    R2,
    /// Mean squared error
    Mse,
    /// Root mean squared error
    Rmse,
    /// Mean absolute error
    Mae,
}

impl Metric {
    /// Compute the metric
    pub fn score(&self, y_true: &Array2<f64>, y_pred: &Array2<f64>) -> Result<f64> {
        check_shapes(y_true, y_pred)?;
        let value = match self {
            Metric::R2 => r2_score(y_true, y_pred)?,
            Metric::Mse => mean_squared_error(y_true, y_pred)?,
            Metric::Rmse => mean_squared_error(y_true, y_pred)?.sqrt(),
            Metric::Mae => mean_absolute_error(y_true, y_pred)?,
        };
        Ok(value)
    }

    /// Whether larger values are better
    pub fn greater_is_better(&self) -> bool {
        matches!(self, Metric::R2)
    }

    /// Score oriented so that larger is always better (errors are negated)
    pub fn oriented_score(&self, y_true: &Array2<f64>, y_pred: &Array2<f64>) -> Result<f64> {
        let value = self.score(y_true, y_pred)?;
        Ok(if self.greater_is_better() { value } else { -value })
    }
}

impl FromStr for Metric {
    type Err = DatamodelerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "r2" | "r2_score" => Ok(Metric::R2),
            "mse" | "mean_squared_error" | "neg_mean_squared_error" => Ok(Metric::Mse),
            "rmse" | "root_mean_squared_error" | "neg_root_mean_squared_error" => Ok(Metric::Rmse),
            "mae" | "mean_absolute_error" | "neg_mean_absolute_error" => Ok(Metric::Mae),
            other => Err(DatamodelerError::InvalidParameter {
                name: "scoring_func".to_string(),
                value: other.to_string(),
                reason: "expected one of r2, mse, rmse, mae".to_string(),
            }),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::R2 => "r2",
            Metric::Mse => "mse",
            Metric::Rmse => "rmse",
            Metric::Mae => "mae",
        };
        f.write_str(name)
    }
}

/// R² averaged uniformly over output columns
pub fn r2_score(y_true: &Array2<f64>, y_pred: &Array2<f64>) -> Result<f64> {
    check_shapes(y_true, y_pred)?;
    let n_outputs = y_true.ncols();
    let total: f64 = y_true
        .columns()
        .into_iter()
        .zip(y_pred.columns())
        .map(|(t, p)| column_r2(t, p))
        .sum();
    Ok(total / n_outputs as f64)
}

/// Mean squared error over all cells
pub fn mean_squared_error(y_true: &Array2<f64>, y_pred: &Array2<f64>) -> Result<f64> {
    check_shapes(y_true, y_pred)?;
    Ok((y_true - y_pred).mapv(|e| e * e).mean().unwrap_or(0.0))
}

/// Mean absolute error over all cells
pub fn mean_absolute_error(y_true: &Array2<f64>, y_pred: &Array2<f64>) -> Result<f64> {
    check_shapes(y_true, y_pred)?;
    Ok((y_true - y_pred).mapv(f64::abs).mean().unwrap_or(0.0))
}

fn column_r2(y_true: ArrayView1<f64>, y_pred: ArrayView1<f64>) -> f64 {
    let y_mean = y_true.mean().unwrap_or(0.0);
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - y_mean).powi(2)).sum();

    if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    }
}

fn check_shapes(y_true: &Array2<f64>, y_pred: &Array2<f64>) -> Result<()> {
    if y_true.dim() != y_pred.dim() {
        return Err(DatamodelerError::ShapeError {
            expected: format!("{:?}", y_true.dim()),
            actual: format!("{:?}", y_pred.dim()),
        });
    }
    if y_true.is_empty() {
        return Err(DatamodelerError::ValidationError(
            "cannot score an empty prediction".to_string(),
        ));
    }
    Ok(())
}
