//! Forecasting estimators over episodic series

use ndarray::{s, Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use std::fmt;

use crate::data::{Episode, SeriesFrame};
use crate::error::{DatamodelerError, Result};
use crate::training::estimator::{parse_params, MultiOutput};
use crate::training::linear_models::RidgeRegression;

/// Candidate smoothing weights searched when a weight is not configured
fn smoothing_grid() -> Vec<f64> {
    (1..20).map(|i| i as f64 * 0.05).collect()
}

/// Exponential smoothing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EtsConfig {
    /// Level smoothing weight; searched on the training data when unset
    pub alpha: Option<f64>,
    /// Trend smoothing weight; searched when unset and `trend` is on
    pub beta: Option<f64>,
    /// Additive (Holt) trend
    pub trend: bool,
}

impl Default for EtsConfig {
    fn default() -> Self {
        Self {
            alpha: None,
            beta: None,
            trend: false,
        }
    }
}

impl EtsConfig {
    fn validate(&self) -> Result<()> {
        for (name, value) in [("alpha", self.alpha), ("beta", self.beta)] {
            if let Some(v) = value {
                if !(v > 0.0 && v <= 1.0) {
                    return Err(DatamodelerError::InvalidParameter {
                        name: name.to_string(),
                        value: v.to_string(),
                        reason: "smoothing weight must lie in (0, 1]".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Final smoothing state and the one-step predictions made on the way
struct Smoothed {
    level: f64,
    trend: f64,
    /// Predictions for observations 1..len
    one_step: Vec<f64>,
}

impl Smoothed {
    fn sse(&self, series: ArrayView1<f64>) -> f64 {
        self.one_step
            .iter()
            .zip(series.iter().skip(1))
            .map(|(p, y)| (p - y).powi(2))
            .sum()
    }
}

fn smooth(series: ArrayView1<f64>, alpha: f64, beta: Option<f64>) -> Smoothed {
    let n = series.len();
    let mut level = series.first().copied().unwrap_or(0.0);
    let mut trend = match beta {
        Some(_) if n > 1 => series[1] - series[0],
        _ => 0.0,
    };
    let mut one_step = Vec::with_capacity(n.saturating_sub(1));

    for &y in series.iter().skip(1) {
        one_step.push(level + trend);
        let previous = level;
        level = alpha * y + (1.0 - alpha) * (level + trend);
        if let Some(b) = beta {
            trend = b * (level - previous) + (1.0 - b) * trend;
        }
    }

    Smoothed {
        level,
        trend,
        one_step,
    }
}

/// Simple or Holt exponential smoothing, one model per target column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExponentialSmoothing {
    config: EtsConfig,
    alphas: Vec<f64>,
    betas: Vec<Option<f64>>,
}

impl ExponentialSmoothing {
    pub fn new(config: EtsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            alphas: Vec::new(),
            betas: Vec::new(),
        })
    }

    pub fn is_fitted(&self) -> bool {
        !self.alphas.is_empty()
    }

    /// Fitted (alpha, beta) per target column
    pub fn weights(&self) -> Vec<(f64, Option<f64>)> {
        self.alphas.iter().copied().zip(self.betas.iter().copied()).collect()
    }

    pub fn fit(&mut self, frame: &SeriesFrame) -> Result<()> {
        if !frame.episodes().iter().any(|e| e.len() > 1) {
            return Err(DatamodelerError::ValidationError(
                "exponential smoothing needs an episode with at least two observations".to_string(),
            ));
        }

        let alpha_grid = match self.config.alpha {
            Some(a) => vec![a],
            None => smoothing_grid(),
        };
        let beta_grid: Vec<Option<f64>> = match (self.config.trend, self.config.beta) {
            (false, _) => vec![None],
            (true, Some(b)) => vec![Some(b)],
            (true, None) => smoothing_grid().into_iter().map(Some).collect(),
        };

        self.alphas.clear();
        self.betas.clear();
        for j in 0..frame.output_dim() {
            let mut best = (f64::INFINITY, alpha_grid[0], beta_grid[0]);
            for &alpha in &alpha_grid {
                for &beta in &beta_grid {
                    let sse: f64 = frame
                        .episodes()
                        .iter()
                        .map(|e| {
                            let series = e.targets.column(j);
                            smooth(series, alpha, beta).sse(series)
                        })
                        .sum();
                    if sse < best.0 {
                        best = (sse, alpha, beta);
                    }
                }
            }
            self.alphas.push(best.1);
            self.betas.push(best.2);
        }
        Ok(())
    }

    pub fn forecast(&self, episode: &Episode, n: usize) -> Result<Array2<f64>> {
        self.check_fitted(episode)?;
        if episode.is_empty() {
            return Err(DatamodelerError::ValidationError(
                "cannot forecast from an empty history".to_string(),
            ));
        }

        let mut out = Array2::<f64>::zeros((n, self.alphas.len()));
        for (j, (&alpha, &beta)) in self.alphas.iter().zip(&self.betas).enumerate() {
            let state = smooth(episode.targets.column(j), alpha, beta);
            for h in 0..n {
                out[[h, j]] = state.level + (h + 1) as f64 * state.trend;
            }
        }
        Ok(out)
    }

    /// One-step-ahead predictions for rows `1..len`
    pub fn one_step(&self, episode: &Episode) -> Result<(usize, Array2<f64>)> {
        self.check_fitted(episode)?;
        let rows = episode.len().saturating_sub(1);
        let mut out = Array2::<f64>::zeros((rows, self.alphas.len()));
        for (j, (&alpha, &beta)) in self.alphas.iter().zip(&self.betas).enumerate() {
            let state = smooth(episode.targets.column(j), alpha, beta);
            out.column_mut(j).assign(&Array1::from_vec(state.one_step));
        }
        Ok((1, out))
    }

    fn check_fitted(&self, episode: &Episode) -> Result<()> {
        if !self.is_fitted() {
            return Err(DatamodelerError::ModelNotFitted);
        }
        if episode.targets.ncols() != self.alphas.len() {
            return Err(DatamodelerError::ShapeError {
                expected: format!("{} target columns", self.alphas.len()),
                actual: format!("{} target columns", episode.targets.ncols()),
            });
        }
        Ok(())
    }
}

/// Vector autoregression parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VarConfig {
    /// Autoregressive order
    pub p: usize,
    /// Ridge penalty on the lag coefficients
    pub alpha: f64,
    pub fit_intercept: bool,
}

impl Default for VarConfig {
    fn default() -> Self {
        Self {
            p: 1,
            alpha: 1e-3,
            fit_intercept: true,
        }
    }
}

/// VAR(p) with lagged exogenous covariates, solved as a multi-output ridge regression.
///
/// The design row for step `t` is `[y(t-1), .., y(t-p), u(t-1)]`, so every
/// one-step forecast only needs observed history. Beyond the history the last
/// observed covariates are held constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorAutoregression {
    config: VarConfig,
    regression: MultiOutput<RidgeRegression>,
    n_targets: usize,
    n_covariates: usize,
}

impl VectorAutoregression {
    pub fn new(config: VarConfig) -> Result<Self> {
        if config.p == 0 {
            return Err(DatamodelerError::InvalidParameter {
                name: "p".to_string(),
                value: "0".to_string(),
                reason: "autoregressive order must be at least 1".to_string(),
            });
        }
        if config.alpha < 0.0 {
            return Err(DatamodelerError::InvalidParameter {
                name: "alpha".to_string(),
                value: config.alpha.to_string(),
                reason: "must be non-negative".to_string(),
            });
        }
        let ridge = RidgeRegression::new(config.alpha).with_fit_intercept(config.fit_intercept);
        Ok(Self {
            config,
            regression: MultiOutput::new(ridge),
            n_targets: 0,
            n_covariates: 0,
        })
    }

    pub fn is_fitted(&self) -> bool {
        self.regression.is_fitted()
    }

    pub fn order(&self) -> usize {
        self.config.p
    }

    fn n_inputs(&self) -> usize {
        self.config.p * self.n_targets + self.n_covariates
    }

    fn design_row(&self, targets: &[Array1<f64>], covariates: ArrayView1<f64>, t: usize) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.n_inputs());
        for lag in 1..=self.config.p {
            row.extend(targets[t - lag].iter().copied());
        }
        row.extend(covariates.iter().copied());
        row
    }

    pub fn fit(&mut self, frame: &SeriesFrame) -> Result<()> {
        self.n_targets = frame.output_dim();
        self.n_covariates = frame.covariate_dim();
        let p = self.config.p;

        let mut rows: Vec<f64> = Vec::new();
        let mut labels: Vec<f64> = Vec::new();
        let mut n_rows = 0;
        for episode in frame.episodes().iter().filter(|e| e.len() > p) {
            let history: Vec<Array1<f64>> = episode.targets.rows().into_iter().map(|r| r.to_owned()).collect();
            for t in p..episode.len() {
                rows.extend(self.design_row(&history, episode.covariates.row(t - 1), t));
                labels.extend(episode.targets.row(t).iter().copied());
                n_rows += 1;
            }
        }

        if n_rows == 0 {
            return Err(DatamodelerError::ValidationError(format!(
                "VAR({}) needs an episode longer than {} observations",
                p, p
            )));
        }

        let x = Array2::from_shape_vec((n_rows, self.n_inputs()), rows)?;
        let y = Array2::from_shape_vec((n_rows, self.n_targets), labels)?;
        self.regression.fit(&x, &y)
    }

    pub fn forecast(&self, episode: &Episode, n: usize) -> Result<Array2<f64>> {
        self.check_fitted(episode)?;
        let p = self.config.p;
        if episode.len() < p {
            return Err(DatamodelerError::ValidationError(format!(
                "VAR({}) forecast needs at least {} observations, got {}",
                p,
                p,
                episode.len()
            )));
        }

        let mut history: Vec<Array1<f64>> = episode.targets.rows().into_iter().map(|r| r.to_owned()).collect();
        let covariates = episode.covariates.row(episode.len() - 1);
        let mut out = Array2::<f64>::zeros((n, self.n_targets));

        for h in 0..n {
            let t = history.len();
            let row = self.design_row(&history, covariates, t);
            let x = Array2::from_shape_vec((1, self.n_inputs()), row)?;
            let next = self.regression.predict(&x)?.row(0).to_owned();
            out.row_mut(h).assign(&next);
            history.push(next);
        }
        Ok(out)
    }

    /// One-step-ahead predictions for rows `p..len`
    pub fn one_step(&self, episode: &Episode) -> Result<(usize, Array2<f64>)> {
        self.check_fitted(episode)?;
        let p = self.config.p;
        if episode.len() <= p {
            return Ok((p, Array2::zeros((0, self.n_targets))));
        }

        let history: Vec<Array1<f64>> = episode.targets.rows().into_iter().map(|r| r.to_owned()).collect();
        let n_rows = episode.len() - p;
        let mut rows = Vec::with_capacity(n_rows * self.n_inputs());
        for t in p..episode.len() {
            rows.extend(self.design_row(&history, episode.covariates.row(t - 1), t));
        }
        let x = Array2::from_shape_vec((n_rows, self.n_inputs()), rows)?;
        Ok((p, self.regression.predict(&x)?))
    }

    fn check_fitted(&self, episode: &Episode) -> Result<()> {
        if !self.is_fitted() {
            return Err(DatamodelerError::ModelNotFitted);
        }
        if episode.targets.ncols() != self.n_targets || episode.covariates.ncols() != self.n_covariates {
            return Err(DatamodelerError::ShapeError {
                expected: format!("{} targets and {} covariates", self.n_targets, self.n_covariates),
                actual: format!(
                    "{} targets and {} covariates",
                    episode.targets.ncols(),
                    episode.covariates.ncols()
                ),
            });
        }
        Ok(())
    }
}

/// Closed set of forecasters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Forecaster {
    Ets(ExponentialSmoothing),
    Varima(VectorAutoregression),
}

impl Forecaster {
    pub fn fit(&mut self, frame: &SeriesFrame) -> Result<()> {
        match self {
            Forecaster::Ets(m) => m.fit(frame),
            Forecaster::Varima(m) => m.fit(frame),
        }
    }

    /// `n` steps past the end of `episode`
    pub fn forecast(&self, episode: &Episode, n: usize) -> Result<Array2<f64>> {
        match self {
            Forecaster::Ets(m) => m.forecast(episode, n),
            Forecaster::Varima(m) => m.forecast(episode, n),
        }
    }

    /// First predicted row index and the one-step-ahead predictions from there on
    pub fn one_step(&self, episode: &Episode) -> Result<(usize, Array2<f64>)> {
        match self {
            Forecaster::Ets(m) => m.one_step(episode),
            Forecaster::Varima(m) => m.one_step(episode),
        }
    }

    pub fn is_fitted(&self) -> bool {
        match self {
            Forecaster::Ets(m) => m.is_fitted(),
            Forecaster::Varima(m) => m.is_fitted(),
        }
    }

    pub fn kind(&self) -> ForecasterKind {
        match self {
            Forecaster::Ets(_) => ForecasterKind::Ets,
            Forecaster::Varima(_) => ForecasterKind::Varima,
        }
    }
}

/// Registry entry for a forecaster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForecasterKind {
    Ets,
    Varima,
}

impl ForecasterKind {
    pub fn name(&self) -> &'static str {
        match self {
            ForecasterKind::Ets => "ets",
            ForecasterKind::Varima => "varima",
        }
    }

    pub fn build(&self, params: &Mapping) -> Result<Forecaster> {
        match self {
            ForecasterKind::Ets => {
                let config: EtsConfig = parse_params(self.name(), params)?;
                Ok(Forecaster::Ets(ExponentialSmoothing::new(config)?))
            }
            ForecasterKind::Varima => {
                let config: VarConfig = parse_params(self.name(), params)?;
                Ok(Forecaster::Varima(VectorAutoregression::new(config)?))
            }
        }
    }
}

impl fmt::Display for ForecasterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Slice `targets[start..]` as the truth matching a one-step prediction block
pub(crate) fn one_step_truth(episode: &Episode, start: usize) -> Array2<f64> {
    let start = start.min(episode.len());
    episode.targets.slice(s![start.., ..]).to_owned()
}
