//! End-to-end training run driven by a [`RunConfig`]
//!
//! A run resolves the model family from the configured name, loads and splits
//! the dataset, then either fits directly or sweeps. Tabular runs score the
//! held-out split, save the model and mirror the splits under `run_dir/data`.
//! Time-series runs fit and forecast only.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::config::{DataFormat, PathMode, RunConfig};
use crate::data::{DatasetLoader, DatasetSaver, SplitDataset};
use crate::error::{DatamodelerError, Result};
use crate::optimizer::{GridSearch, SearchAlgorithm, SplitStrategy, SweepSpace};
use crate::timeseries::{ForecastParams, TimeSeriesModel, TsFitParams};
use crate::training::{r2_score, EstimatorKind, Metric, Model, ModelFamily, ModelRegistry, SweepRequest};

/// Directories a run reads from and writes to
#[derive(Debug, Clone)]
pub struct RunPaths {
    /// Relative dataset and model paths are resolved against this
    pub base_dir: PathBuf,
    /// Per-run output directory
    pub run_dir: PathBuf,
}

impl RunPaths {
    pub fn new(base_dir: impl Into<PathBuf>, run_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            run_dir: run_dir.into(),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.run_dir.join("data")
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub family: ModelFamily,
    /// Test-split R² (tabular runs only)
    pub r2: Option<f64>,
    /// Number of sweep trials, when a sweep ran
    pub trials: Option<usize>,
    pub n_train: usize,
    pub n_test: usize,
    /// Rows and columns of the final prediction
    pub prediction_shape: (usize, usize),
}

enum Resolved {
    Tabular(EstimatorKind),
    Forecaster(String),
}

/// Run one configuration end to end
pub fn run(config: &RunConfig, paths: &RunPaths) -> Result<RunReport> {
    info!("Configuration:\n{}", config.to_yaml()?);

    let model_name = config.model.name.as_str();
    let family = ModelFamily::resolve(model_name, &config.model.time_series_models());
    let registry = ModelRegistry::new();
    let resolved = match family {
        ModelFamily::TimeSeries => {
            registry.forecaster(model_name)?;
            Resolved::Forecaster(model_name.to_string())
        }
        _ => Resolved::Tabular(registry.estimator(model_name, family)?),
    };
    info!(model = model_name, family = %family, "Resolved model");
    for key in config.data.ignored_keys() {
        warn!(key = %format!("data.{}", key), "Configuration key has no effect and is ignored");
    }

    let dataset_path = resolve_dataset_path(config, &paths.base_dir)?;
    let save_path = paths.base_dir.join(&config.model.saver.filename);

    match resolved {
        Resolved::Tabular(kind) => run_tabular(config, paths, family, kind, &dataset_path, &save_path),
        Resolved::Forecaster(name) => run_time_series(config, family, &name, &dataset_path),
    }
}

fn resolve_dataset_path(config: &RunConfig, base_dir: &Path) -> Result<PathBuf> {
    let path = config
        .data
        .path
        .as_ref()
        .ok_or_else(|| DatamodelerError::ConfigError("missing required key 'data.path'".to_string()))?;
    Ok(match config.data.full_or_relative {
        PathMode::Relative => base_dir.join(path),
        PathMode::Full => path.clone(),
    })
}

/// Test fraction reported for a loaded split: the configured `test_perc`,
/// except for pre-split `.npy` files where only the realized one exists
fn reported_test_fraction(config: &RunConfig, split: &SplitDataset) -> f64 {
    match config.data.format {
        DataFormat::NumpySplit => split.test_fraction(),
        DataFormat::Csv | DataFormat::Numpy => config.data.test_perc(),
    }
}

fn log_split_percentages(test_perc: f64) {
    info!(
        "From the full dataset, {}% will be used for test, while {}% for training/sweeping",
        test_perc * 100.0,
        (1.0 - test_perc) * 100.0
    );
}

fn run_tabular(
    config: &RunConfig,
    paths: &RunPaths,
    family: ModelFamily,
    kind: EstimatorKind,
    dataset_path: &Path,
    save_path: &Path,
) -> Result<RunReport> {
    let mut model = Model::new(kind);
    let split: SplitDataset = match config.data.format {
        DataFormat::Csv => model.load_episodes(dataset_path, &config.data.csv_options()?)?,
        DataFormat::Numpy => model.load_numpy(dataset_path)?.split(config.data.test_perc())?,
        DataFormat::NumpySplit => model.load_numpy_splits(dataset_path)?,
    };
    log_split_percentages(reported_test_fraction(config, &split));

    let saver = DatasetSaver::new(paths.data_dir());
    info!(dir = %saver.dir().display(), "Saving data");
    saver.save_npy(&split)?;

    info!("Building model...");
    model.build_model(&config.model.build_params)?;

    let (x_train, y_train) = (split.train.x(), split.train.y());
    let trials = if config.model.sweep.run {
        let request = sweep_request(config, paths)?;
        let backend = match config.model.sweep.random_state {
            Some(seed) => GridSearch::new(request.search_algorithm).with_random_state(seed),
            None => GridSearch::new(request.search_algorithm),
        };
        info!(params = ?request.space.names(), "Sweeping with parameters");
        let table = model.sweep(x_train, y_train, &request, &backend)?;
        info!("Sweep results:\n{}", table);
        Some(table.len())
    } else {
        info!("Fitting model...");
        model.fit(x_train, y_train, config.model.scale_data())?;
        None
    };

    let y_pred = model.predict(split.test.x(), true)?;
    let r2 = r2_score(split.test.y(), &y_pred)?;
    info!("R^2 score is {} for test set.", r2);

    info!(path = %save_path.display(), "Saving model");
    model.save_model(save_path)?;
    saver.save_csv(&split)?;

    Ok(RunReport {
        family,
        r2: Some(r2),
        trials,
        n_train: split.train.n_rows(),
        n_test: split.test.n_rows(),
        prediction_shape: y_pred.dim(),
    })
}

fn sweep_request(config: &RunConfig, paths: &RunPaths) -> Result<SweepRequest> {
    let sweep = &config.model.sweep;
    let mut request = SweepRequest::new(SweepSpace::from_mapping(&sweep.params)?)
        .with_num_trials(sweep.num_trials.unwrap_or(0))
        .with_split_strategy(SplitStrategy::from_value(&sweep.split_strategy)?)
        .with_scale_data(config.model.scale_data());
    if let Some(algorithm) = &sweep.search_algorithm {
        request.search_algorithm = SearchAlgorithm::from_str(algorithm)?;
    }
    if let Some(scoring) = &sweep.scoring_func {
        request = request.with_scoring(Metric::from_str(scoring)?);
    }
    if let Some(path) = &sweep.results_csv_path {
        request = request.with_results_csv_path(paths.run_dir.join(path));
    }
    Ok(request)
}

fn run_time_series(config: &RunConfig, family: ModelFamily, name: &str, dataset_path: &Path) -> Result<RunReport> {
    let mut model = TimeSeriesModel::new();
    let (train, test) = DatasetLoader::new().load_series(dataset_path, &config.data.series_options()?)?;
    log_split_percentages(config.data.test_perc());

    info!("Building model...");
    model.build_model(name, config.model.scale_data(), &config.model.build_params)?;

    if config.model.sweep.run {
        warn!(model = name, "Sweeping is not supported for time-series models, fitting directly");
    }
    info!("Fitting model...");
    model.fit(&train, &TsFitParams::from_mapping(&config.model.fit_params)?)?;

    let params = ForecastParams::from_mapping(&config.model.predict_params)?;
    let forecasts = model.predict(&test, &params)?;
    let rows = forecasts.iter().map(|f| f.nrows()).sum::<usize>();
    info!(episodes = forecasts.len(), steps = params.n, "Forecast test episodes");

    Ok(RunReport {
        family,
        r2: None,
        trials: None,
        n_train: train.n_rows(),
        n_test: test.n_rows(),
        prediction_shape: (rows, test.output_dim()),
    })
}
