//! Model training module
//!
//! Provides the tabular side of the harness:
//! - Linear models (OLS, Ridge, Lasso)
//! - K-Nearest Neighbors
//! - Neural networks (MLP)
//! - The estimator registry and model family resolution
//! - Regression metrics
//! - The [`Model`] lifecycle (build, fit, predict, evaluate, sweep, persist)

pub mod estimator;
pub mod knn;
pub mod linear_models;
pub mod metrics;
mod model;
pub mod neural_network;

pub use estimator::{
    Estimator, EstimatorKind, LassoParams, LinearParams, ModelFamily, ModelRegistry, MultiOutput, Regressor,
    RidgeParams, DEFAULT_TIME_SERIES_MODELS,
};
pub use knn::{DistanceMetric, KNNConfig, KNNRegressor, WeightScheme};
pub use linear_models::{LassoRegression, LinearRegression, RidgeRegression};
pub use metrics::{mean_absolute_error, mean_squared_error, r2_score, Metric};
pub use model::{Model, ModelState, SweepRequest};
pub use neural_network::{Activation, MLPConfig, MLPRegressor};
