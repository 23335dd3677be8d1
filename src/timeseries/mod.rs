//! Time series module
//!
//! Forecasting over ordered episodes:
//! - Exponential smoothing (simple and Holt trend)
//! - Vector autoregression with lagged exogenous covariates
//! - [`TimeSeriesModel`], the build/fit/predict/evaluate lifecycle around them

mod forecasters;
mod model;

pub use forecasters::{
    EtsConfig, ExponentialSmoothing, Forecaster, ForecasterKind, VarConfig, VectorAutoregression,
};
pub use model::{ForecastParams, TimeSeriesModel, TsFitParams};
