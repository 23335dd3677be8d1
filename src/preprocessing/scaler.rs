//! Feature scaling implementations

use crate::error::{DatamodelerError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Standard scaling (z-score normalization): (x - mean) / std
///
/// Statistics are population statistics over the fitted batch, so refitting on
/// the same data always reproduces the same parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Option<Array1<f64>>,
    scale: Option<Array1<f64>>,
}

impl StandardScaler {
    /// Create a new, unfitted scaler
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit per-column mean and standard deviation
    pub fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self> {
        if x.nrows() == 0 {
            return Err(DatamodelerError::ShapeError {
                expected: "at least one row".to_string(),
                actual: "0 rows".to_string(),
            });
        }

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| DatamodelerError::ComputationError("empty batch".to_string()))?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s == 0.0 || !s.is_finite() { 1.0 } else { s });

        self.mean = Some(mean);
        self.scale = Some(scale);
        Ok(self)
    }

    /// Apply the fitted transform
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (mean, scale) = self.params(x.ncols())?;
        Ok((x - &mean.view().insert_axis(Axis(0))) / &scale.view().insert_axis(Axis(0)))
    }

    /// Fit and transform in one step
    pub fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    /// Map scaled values back to the original units
    pub fn inverse_transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (mean, scale) = self.params(x.ncols())?;
        Ok(x * &scale.view().insert_axis(Axis(0)) + &mean.view().insert_axis(Axis(0)))
    }

    /// Whether `fit` has run
    pub fn is_fitted(&self) -> bool {
        self.mean.is_some()
    }

    /// Fitted per-column means
    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.mean.as_ref()
    }

    /// Fitted per-column standard deviations (zeros replaced by 1.0)
    pub fn scale(&self) -> Option<&Array1<f64>> {
        self.scale.as_ref()
    }

    fn params(&self, n_cols: usize) -> Result<(&Array1<f64>, &Array1<f64>)> {
        let (mean, scale) = match (&self.mean, &self.scale) {
            (Some(m), Some(s)) => (m, s),
            _ => return Err(DatamodelerError::ModelNotFitted),
        };
        if mean.len() != n_cols {
            return Err(DatamodelerError::ShapeError {
                expected: format!("{} columns", mean.len()),
                actual: format!("{} columns", n_cols),
            });
        }
        Ok((mean, scale))
    }
}

/// Independently fitted scalers for features and labels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingTransform {
    pub x: StandardScaler,
    pub y: StandardScaler,
}

impl ScalingTransform {
    /// Fit both scalers and return the scaled pair
    pub fn fit(x: &Array2<f64>, y: &Array2<f64>) -> Result<(Self, Array2<f64>, Array2<f64>)> {
        let mut x_scaler = StandardScaler::new();
        let mut y_scaler = StandardScaler::new();
        let x_scaled = x_scaler.fit_transform(x)?;
        let y_scaled = y_scaler.fit_transform(y)?;

        Ok((
            Self {
                x: x_scaler,
                y: y_scaler,
            },
            x_scaled,
            y_scaled,
        ))
    }
}
