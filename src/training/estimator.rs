//! Estimator registry and dispatch
//!
//! Every tabular model is one variant of the closed [`Estimator`] enum. The
//! registry maps configuration names onto an [`EstimatorKind`], which knows how
//! to turn a YAML parameter mapping into a typed, unfitted estimator.

use ndarray::{stack, Array1, Array2, ArrayView1, Axis};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fmt;

use super::knn::{KNNConfig, KNNRegressor};
use super::linear_models::{LassoRegression, LinearRegression, RidgeRegression};
use super::neural_network::{MLPConfig, MLPRegressor};
use crate::error::{DatamodelerError, Result};
use crate::timeseries::ForecasterKind;

/// Single-output regressor
pub trait Regressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;
    fn is_fitted(&self) -> bool;
}

/// Fits one clone of a single-output regressor per label column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiOutput<R> {
    template: R,
    fitted: Vec<R>,
}

impl<R: Regressor + Clone> MultiOutput<R> {
    pub fn new(template: R) -> Self {
        Self {
            template,
            fitted: Vec::new(),
        }
    }

    pub fn template(&self) -> &R {
        &self.template
    }

    /// Per-column fitted estimators
    pub fn estimators(&self) -> &[R] {
        &self.fitted
    }

    pub fn is_fitted(&self) -> bool {
        !self.fitted.is_empty() && self.fitted.iter().all(|r| r.is_fitted())
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
        self.fitted = y
            .columns()
            .into_iter()
            .map(|column| {
                let mut estimator = self.template.clone();
                estimator.fit(x, &column.to_owned())?;
                Ok(estimator)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.fitted.is_empty() {
            return Err(DatamodelerError::ModelNotFitted);
        }
        let columns = self
            .fitted
            .iter()
            .map(|r| r.predict(x))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<ArrayView1<f64>> = columns.iter().map(|c| c.view()).collect();
        Ok(stack(Axis(1), &views)?)
    }
}

/// Parameters for ordinary least squares
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinearParams {
    pub fit_intercept: bool,
}

impl Default for LinearParams {
    fn default() -> Self {
        Self { fit_intercept: true }
    }
}

/// Parameters for ridge regression
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RidgeParams {
    pub alpha: f64,
    pub fit_intercept: bool,
}

impl Default for RidgeParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            fit_intercept: true,
        }
    }
}

/// Parameters for lasso regression
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LassoParams {
    pub alpha: f64,
    pub max_iter: usize,
    pub tol: f64,
    pub fit_intercept: bool,
}

impl Default for LassoParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            max_iter: 1000,
            tol: 1e-6,
            fit_intercept: true,
        }
    }
}

/// Closed set of tabular estimators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Estimator {
    Linear(MultiOutput<LinearRegression>),
    Ridge(MultiOutput<RidgeRegression>),
    Lasso(MultiOutput<LassoRegression>),
    Knn(KNNRegressor),
    Mlp(MLPRegressor),
}

impl Estimator {
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
        match self {
            Estimator::Linear(m) => m.fit(x, y),
            Estimator::Ridge(m) => m.fit(x, y),
            Estimator::Lasso(m) => m.fit(x, y),
            Estimator::Knn(m) => m.fit(x, y),
            Estimator::Mlp(m) => m.fit(x, y),
        }
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            Estimator::Linear(m) => m.predict(x),
            Estimator::Ridge(m) => m.predict(x),
            Estimator::Lasso(m) => m.predict(x),
            Estimator::Knn(m) => m.predict(x),
            Estimator::Mlp(m) => m.predict(x),
        }
    }

    pub fn is_fitted(&self) -> bool {
        match self {
            Estimator::Linear(m) => m.is_fitted(),
            Estimator::Ridge(m) => m.is_fitted(),
            Estimator::Lasso(m) => m.is_fitted(),
            Estimator::Knn(m) => m.is_fitted(),
            Estimator::Mlp(m) => m.is_fitted(),
        }
    }

    pub fn kind(&self) -> EstimatorKind {
        match self {
            Estimator::Linear(_) => EstimatorKind::Linear,
            Estimator::Ridge(_) => EstimatorKind::Ridge,
            Estimator::Lasso(_) => EstimatorKind::Lasso,
            Estimator::Knn(_) => EstimatorKind::Knn,
            Estimator::Mlp(_) => EstimatorKind::Mlp,
        }
    }
}

/// Registry entry for a tabular estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstimatorKind {
    Linear,
    Ridge,
    Lasso,
    Knn,
    Mlp,
}

impl EstimatorKind {
    /// Name used in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            EstimatorKind::Linear => "linear_model",
            EstimatorKind::Ridge => "ridge",
            EstimatorKind::Lasso => "lasso",
            EstimatorKind::Knn => "knn",
            EstimatorKind::Mlp => "pytorch",
        }
    }

    /// Construct an unfitted estimator from build parameters
    pub fn build(&self, params: &Mapping) -> Result<Estimator> {
        let estimator = match self {
            EstimatorKind::Linear => {
                let p: LinearParams = parse_params(self.name(), params)?;
                Estimator::Linear(MultiOutput::new(
                    LinearRegression::new().with_fit_intercept(p.fit_intercept),
                ))
            }
            EstimatorKind::Ridge => {
                let p: RidgeParams = parse_params(self.name(), params)?;
                check_non_negative("alpha", p.alpha)?;
                Estimator::Ridge(MultiOutput::new(
                    RidgeRegression::new(p.alpha).with_fit_intercept(p.fit_intercept),
                ))
            }
            EstimatorKind::Lasso => {
                let p: LassoParams = parse_params(self.name(), params)?;
                check_non_negative("alpha", p.alpha)?;
                Estimator::Lasso(MultiOutput::new(
                    LassoRegression::new(p.alpha)
                        .with_max_iter(p.max_iter)
                        .with_tol(p.tol)
                        .with_fit_intercept(p.fit_intercept),
                ))
            }
            EstimatorKind::Knn => {
                let config: KNNConfig = parse_params(self.name(), params)?;
                Estimator::Knn(KNNRegressor::new(config)?)
            }
            EstimatorKind::Mlp => {
                let config: MLPConfig = parse_params(self.name(), params)?;
                Estimator::Mlp(MLPRegressor::new(config)?)
            }
        };
        Ok(estimator)
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Deserialize a YAML parameter mapping into a typed config
pub(crate) fn parse_params<T: DeserializeOwned>(model: &str, params: &Mapping) -> Result<T> {
    serde_yaml::from_value(Value::Mapping(params.clone())).map_err(|e| {
        DatamodelerError::InvalidParameter {
            name: format!("{}.build_params", model),
            value: serde_yaml::to_string(params).unwrap_or_default().trim().to_string(),
            reason: e.to_string(),
        }
    })
}

fn check_non_negative(name: &str, value: f64) -> Result<()> {
    if value < 0.0 || !value.is_finite() {
        return Err(DatamodelerError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: "must be a finite, non-negative number".to_string(),
        });
    }
    Ok(())
}

/// Coarse model family, decides which loader and lifecycle the trainer uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFamily {
    Regressor,
    Neural,
    TimeSeries,
}

impl ModelFamily {
    /// Resolve a model name against the configured time-series membership list
    pub fn resolve<S: AsRef<str>>(name: &str, time_series_models: &[S]) -> Self {
        let name = name.to_lowercase();
        if name == "pytorch" {
            ModelFamily::Neural
        } else if time_series_models
            .iter()
            .any(|m| m.as_ref().to_lowercase() == name)
        {
            ModelFamily::TimeSeries
        } else {
            ModelFamily::Regressor
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelFamily::Regressor => "regressor",
            ModelFamily::Neural => "neural",
            ModelFamily::TimeSeries => "time-series",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Time-series names recognised by default
pub const DEFAULT_TIME_SERIES_MODELS: [&str; 5] = ["nhits", "tftmodel", "varima", "ets", "sfarima"];

/// Three disjoint name registries
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    regressors: Vec<EstimatorKind>,
    neural: Vec<EstimatorKind>,
    time_series: Vec<ForecasterKind>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self {
            regressors: vec![
                EstimatorKind::Linear,
                EstimatorKind::Ridge,
                EstimatorKind::Lasso,
                EstimatorKind::Knn,
            ],
            neural: vec![EstimatorKind::Mlp],
            time_series: vec![ForecasterKind::Ets, ForecasterKind::Varima],
        }
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a tabular estimator within the given family
    pub fn estimator(&self, name: &str, family: ModelFamily) -> Result<EstimatorKind> {
        let candidates = match family {
            ModelFamily::Regressor => &self.regressors,
            ModelFamily::Neural => &self.neural,
            ModelFamily::TimeSeries => {
                return Err(unknown(name, family));
            }
        };
        candidates
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| unknown(name, family))
    }

    /// Look up a forecaster
    pub fn forecaster(&self, name: &str) -> Result<ForecasterKind> {
        self.time_series
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| unknown(name, ModelFamily::TimeSeries))
    }

    /// Registered names per family
    pub fn names(&self, family: ModelFamily) -> Vec<&'static str> {
        match family {
            ModelFamily::Regressor => self.regressors.iter().map(|k| k.name()).collect(),
            ModelFamily::Neural => self.neural.iter().map(|k| k.name()).collect(),
            ModelFamily::TimeSeries => self.time_series.iter().map(|k| k.name()).collect(),
        }
    }
}

fn unknown(name: &str, family: ModelFamily) -> DatamodelerError {
    DatamodelerError::UnknownModel {
        name: name.to_string(),
        family: family.label().to_string(),
    }
}
