//! Linear model implementations (OLS, Ridge, Lasso)

use super::estimator::Regressor;
use crate::error::{DatamodelerError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Solve the symmetric positive-definite system Ax = b with a Cholesky factorization.
/// Returns `None` when A is not positive definite.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }

    // A = L * L^T
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // Forward substitution: L * y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[[i, j]] * y[j]).sum();
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // Backward substitution: L^T * x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Some(x)
}

/// Gauss-Jordan elimination with partial pivoting, used when Cholesky fails
fn gauss_jordan_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut aug = Array2::<f64>::zeros((n, n + 1));
    aug.slice_mut(ndarray::s![.., ..n]).assign(a);
    aug.column_mut(n).assign(b);

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&r1, &r2| {
            aug[[r1, col]]
                .abs()
                .partial_cmp(&aug[[r2, col]].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if aug[[pivot_row, col]].abs() < 1e-12 {
            return None;
        }
        if pivot_row != col {
            for j in 0..=n {
                aug.swap([col, j], [pivot_row, j]);
            }
        }

        let pivot = aug[[col, col]];
        aug.row_mut(col).mapv_inplace(|v| v / pivot);

        for row in 0..n {
            if row != col {
                let factor = aug[[row, col]];
                if factor != 0.0 {
                    let pivot_vals = aug.row(col).to_owned();
                    aug.row_mut(row).scaled_add(-factor, &pivot_vals);
                }
            }
        }
    }

    Some(aug.column(n).to_owned())
}

/// Solve (X^T X + ridge * I) w = X^T y
fn solve_normal_equations(x: &Array2<f64>, y: &Array1<f64>, ridge: f64) -> Result<Array1<f64>> {
    let mut xtx = x.t().dot(x);
    if ridge > 0.0 {
        xtx.diag_mut().mapv_inplace(|v| v + ridge);
    }
    let xty = x.t().dot(y);

    if let Some(w) = cholesky_solve(&xtx, &xty) {
        return Ok(w);
    }

    // Near-singular: retry with a tiny jitter before falling back to elimination
    let n = xtx.nrows().max(1);
    let jitter = 1e-8 * xtx.diag().iter().map(|v| v.abs()).sum::<f64>() / n as f64;
    let mut jittered = xtx.clone();
    jittered.diag_mut().mapv_inplace(|v| v + jitter);

    cholesky_solve(&jittered, &xty)
        .or_else(|| gauss_jordan_solve(&xtx, &xty))
        .ok_or_else(|| {
            DatamodelerError::ComputationError(
                "Matrix is singular, cannot solve least squares".to_string(),
            )
        })
}

/// Centered copies of x and y plus their means (when fitting an intercept)
struct Centered {
    x: Array2<f64>,
    y: Array1<f64>,
    x_mean: Option<Array1<f64>>,
    y_mean: f64,
}

fn center(x: &Array2<f64>, y: &Array1<f64>, fit_intercept: bool) -> Result<Centered> {
    if x.nrows() != y.len() {
        return Err(DatamodelerError::ShapeError {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }
    if x.nrows() == 0 {
        return Err(DatamodelerError::ValidationError(
            "cannot fit on an empty dataset".to_string(),
        ));
    }

    if !fit_intercept {
        return Ok(Centered {
            x: x.clone(),
            y: y.clone(),
            x_mean: None,
            y_mean: 0.0,
        });
    }

    let x_mean = x
        .mean_axis(Axis(0))
        .ok_or_else(|| DatamodelerError::ComputationError("empty feature matrix".to_string()))?;
    let y_mean = y.mean().unwrap_or(0.0);
    Ok(Centered {
        x: x - &x_mean.view().insert_axis(Axis(0)),
        y: y - y_mean,
        x_mean: Some(x_mean),
        y_mean,
    })
}

fn intercept_for(centered: &Centered, coefficients: &Array1<f64>) -> f64 {
    match &centered.x_mean {
        Some(x_mean) => centered.y_mean - coefficients.dot(x_mean),
        None => 0.0,
    }
}

fn linear_predict(
    coefficients: &Option<Array1<f64>>,
    intercept: f64,
    x: &Array2<f64>,
) -> Result<Array1<f64>> {
    let coefficients = coefficients.as_ref().ok_or(DatamodelerError::ModelNotFitted)?;
    if x.ncols() != coefficients.len() {
        return Err(DatamodelerError::ShapeError {
            expected: format!("{} features", coefficients.len()),
            actual: format!("{} features", x.ncols()),
        });
    }
    Ok(x.dot(coefficients) + intercept)
}

/// Ordinary least squares regression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    /// Fitted coefficients (weights)
    pub coefficients: Option<Array1<f64>>,
    /// Fitted intercept (bias)
    pub intercept: f64,
    /// Whether to fit intercept
    pub fit_intercept: bool,
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearRegression {
    pub fn new() -> Self {
        Self {
            coefficients: None,
            intercept: 0.0,
            fit_intercept: true,
        }
    }

    pub fn with_fit_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }
}

impl Regressor for LinearRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let centered = center(x, y, self.fit_intercept)?;
        let coefficients = solve_normal_equations(&centered.x, &centered.y, 0.0)?;
        self.intercept = intercept_for(&centered, &coefficients);
        self.coefficients = Some(coefficients);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        linear_predict(&self.coefficients, self.intercept, x)
    }

    fn is_fitted(&self) -> bool {
        self.coefficients.is_some()
    }
}

/// Ridge Regression (L2-regularized linear regression)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeRegression {
    pub coefficients: Option<Array1<f64>>,
    pub intercept: f64,
    pub fit_intercept: bool,
    /// L2 regularization strength
    pub alpha: f64,
}

impl Default for RidgeRegression {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RidgeRegression {
    pub fn new(alpha: f64) -> Self {
        Self {
            coefficients: None,
            intercept: 0.0,
            fit_intercept: true,
            alpha,
        }
    }

    pub fn with_fit_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }
}

impl Regressor for RidgeRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let centered = center(x, y, self.fit_intercept)?;
        let coefficients = solve_normal_equations(&centered.x, &centered.y, self.alpha)?;
        self.intercept = intercept_for(&centered, &coefficients);
        self.coefficients = Some(coefficients);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        linear_predict(&self.coefficients, self.intercept, x)
    }

    fn is_fitted(&self) -> bool {
        self.coefficients.is_some()
    }
}

/// Lasso Regression (L1-regularized via coordinate descent)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LassoRegression {
    pub coefficients: Option<Array1<f64>>,
    pub intercept: f64,
    pub fit_intercept: bool,
    /// L1 regularization strength
    pub alpha: f64,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for LassoRegression {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl LassoRegression {
    pub fn new(alpha: f64) -> Self {
        Self {
            coefficients: None,
            intercept: 0.0,
            fit_intercept: true,
            alpha,
            max_iter: 1000,
            tol: 1e-6,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_fit_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }

    /// Soft-threshold operator for the L1 proximal step
    fn soft_threshold(val: f64, threshold: f64) -> f64 {
        if val > threshold {
            val - threshold
        } else if val < -threshold {
            val + threshold
        } else {
            0.0
        }
    }
}

impl Regressor for LassoRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let centered = center(x, y, self.fit_intercept)?;
        let (x_c, y_c) = (&centered.x, &centered.y);
        let n_features = x_c.ncols();

        let col_norms: Vec<f64> = x_c.columns().into_iter().map(|c| c.dot(&c)).collect();
        let lambda = self.alpha * x_c.nrows() as f64;

        let mut w = Array1::<f64>::zeros(n_features);
        let mut residual = y_c.clone();

        for _ in 0..self.max_iter {
            let mut max_step = 0.0f64;

            for j in 0..n_features {
                if col_norms[j] < 1e-15 {
                    continue;
                }
                let column = x_c.column(j);
                let rho = column.dot(&residual) + col_norms[j] * w[j];
                let updated = Self::soft_threshold(rho, lambda) / col_norms[j];
                let step = w[j] - updated;
                if step != 0.0 {
                    residual.scaled_add(step, &column);
                    w[j] = updated;
                    max_step = max_step.max(step.abs());
                }
            }

            if max_step < self.tol {
                break;
            }
        }

        self.intercept = intercept_for(&centered, &w);
        self.coefficients = Some(w);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        linear_predict(&self.coefficients, self.intercept, x)
    }

    fn is_fitted(&self) -> bool {
        self.coefficients.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn plane() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [1.0, 1.0],
            [2.0, 1.0],
            [1.0, 2.0],
            [2.0, 2.0],
            [3.0, 1.0],
        ];
        // y = 2*x1 + 3*x2 + 1
        let y = array![6.0, 8.0, 9.0, 11.0, 10.0];
        (x, y)
    }

    #[test]
    fn test_linear_regression_recovers_plane() {
        let (x, y) = plane();
        let mut model = LinearRegression::new();
        model.fit(&x, &y).unwrap();

        let coef = model.coefficients.as_ref().unwrap();
        assert!((coef[0] - 2.0).abs() < 1e-8);
        assert!((coef[1] - 3.0).abs() < 1e-8);
        assert!((model.intercept - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_collinear_features_still_solve() {
        let x = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let y = array![2.0, 4.0, 6.0];

        let mut model = RidgeRegression::new(0.1);
        model.fit(&x, &y).unwrap();
        let predictions = model.predict(&x).unwrap();
        assert_eq!(predictions.len(), 3);
        assert!((predictions[1] - 4.0).abs() < 0.1);
    }

    #[test]
    fn test_lasso_shrinks_to_zero_with_large_alpha() {
        let (x, y) = plane();
        let mut model = LassoRegression::new(1e6);
        model.fit(&x, &y).unwrap();

        assert!(model.coefficients.as_ref().unwrap().iter().all(|c| *c == 0.0));
        let mean = y.mean().unwrap();
        assert!((model.intercept - mean).abs() < 1e-10);
    }

    #[test]
    fn test_lasso_small_alpha_matches_ols() {
        let (x, y) = plane();
        let mut model = LassoRegression::new(1e-6).with_max_iter(10_000).with_tol(1e-10);
        model.fit(&x, &y).unwrap();

        let pred = model.predict(&x).unwrap();
        for (p, t) in pred.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-2);
        }
    }

    #[test]
    fn test_predict_before_fit() {
        let model = LinearRegression::new();
        assert!(matches!(
            model.predict(&array![[1.0, 2.0]]),
            Err(DatamodelerError::ModelNotFitted)
        ));
    }

    #[test]
    fn test_mismatched_rows_rejected() {
        let mut model = LinearRegression::new();
        let err = model.fit(&array![[1.0], [2.0]], &array![1.0]).unwrap_err();
        assert!(matches!(err, DatamodelerError::ShapeError { .. }));
    }
}
