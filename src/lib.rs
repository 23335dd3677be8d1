//! Datamodeler - configuration-driven training harness for tabular and time-series regression
//!
//! A run is described by a composed YAML configuration. The harness loads a
//! dataset, splits it, builds the configured model, fits or sweeps it, scores
//! the held-out split and persists the model and splits.
//!
//! # Modules
//!
//! ## Core
//! - [`data`] - CSV / `.npy` loading, episodic lag pairing, split persistence
//! - [`preprocessing`] - Standard scaling of features and labels
//! - [`training`] - Estimators, registry, metrics and the [`training::Model`] lifecycle
//! - [`timeseries`] - Forecasters and the [`timeseries::TimeSeriesModel`] lifecycle
//! - [`optimizer`] - Sweep grids, cross-validation splitters and the search backend
//!
//! ## Orchestration
//! - [`config`] - Configuration composition and typed run settings
//! - [`trainer`] - End-to-end run

// Core error handling
pub mod error;

// Core ML modules
pub mod data;
pub mod optimizer;
pub mod preprocessing;
pub mod timeseries;
pub mod training;

// Orchestration
pub mod config;
pub mod trainer;

pub use error::{DatamodelerError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{DatamodelerError, Result};

    // Data
    pub use crate::data::{CsvLoadOptions, Dataset, DatasetLoader, DatasetSaver, SeriesFrame, SplitDataset};

    // Preprocessing
    pub use crate::preprocessing::{ScalingTransform, StandardScaler};

    // Training
    pub use crate::training::{Estimator, EstimatorKind, Metric, Model, ModelFamily, ModelRegistry, ModelState, SweepRequest};

    // Time series
    pub use crate::timeseries::{ForecastParams, Forecaster, ForecasterKind, TimeSeriesModel, TsFitParams};

    // Optimization
    pub use crate::optimizer::{GridSearch, SearchAlgorithm, SearchBackend, SplitStrategy, SweepSpace, TrialTable};

    // Orchestration
    pub use crate::config::{ConfigLoader, RunConfig};
    pub use crate::trainer::{run, RunPaths, RunReport};
}
