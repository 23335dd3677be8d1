//! Model lifecycle: load, build, fit, predict, evaluate, sweep and persist

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use super::estimator::{Estimator, EstimatorKind};
use super::metrics::Metric;
use crate::data::{CsvLoadOptions, Dataset, DatasetLoader, SplitDataset};
use crate::error::{DatamodelerError, Result};
use crate::optimizer::{
    merge_params, SearchAlgorithm, SearchBackend, SearchTask, SplitStrategy, SweepSpace, TrialTable,
};
use crate::preprocessing::ScalingTransform;

/// Lifecycle state of a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModelState<E> {
    Unbuilt,
    Built(E),
    Fitted(E),
}

impl<E> Default for ModelState<E> {
    fn default() -> Self {
        ModelState::Unbuilt
    }
}

impl<E> ModelState<E> {
    pub fn is_built(&self) -> bool {
        !matches!(self, ModelState::Unbuilt)
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self, ModelState::Fitted(_))
    }

    /// Estimator in either built state
    pub fn built(&self) -> Result<&E> {
        match self {
            ModelState::Unbuilt => Err(DatamodelerError::ModelNotBuilt),
            ModelState::Built(e) | ModelState::Fitted(e) => Ok(e),
        }
    }

    /// Estimator once fitted
    pub fn fitted(&self) -> Result<&E> {
        match self {
            ModelState::Unbuilt => Err(DatamodelerError::ModelNotBuilt),
            ModelState::Built(_) => Err(DatamodelerError::ModelNotFitted),
            ModelState::Fitted(e) => Ok(e),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelState::Unbuilt => "unbuilt",
            ModelState::Built(_) => "built",
            ModelState::Fitted(_) => "fitted",
        }
    }
}

/// Sweep settings handed to [`Model::sweep`]
#[derive(Debug, Clone)]
pub struct SweepRequest {
    pub space: SweepSpace,
    pub search_algorithm: SearchAlgorithm,
    /// Zero means the whole grid
    pub num_trials: usize,
    pub scoring: Metric,
    pub split_strategy: SplitStrategy,
    pub results_csv_path: Option<PathBuf>,
    pub scale_data: bool,
}

impl SweepRequest {
    pub fn new(space: SweepSpace) -> Self {
        Self {
            space,
            search_algorithm: SearchAlgorithm::default(),
            num_trials: 0,
            scoring: Metric::R2,
            split_strategy: SplitStrategy::default(),
            results_csv_path: None,
            scale_data: false,
        }
    }

    pub fn with_num_trials(mut self, num_trials: usize) -> Self {
        self.num_trials = num_trials;
        self
    }

    pub fn with_scoring(mut self, scoring: Metric) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_split_strategy(mut self, split_strategy: SplitStrategy) -> Self {
        self.split_strategy = split_strategy;
        self
    }

    pub fn with_results_csv_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_csv_path = Some(path.into());
        self
    }

    pub fn with_scale_data(mut self, scale_data: bool) -> Self {
        self.scale_data = scale_data;
        self
    }
}

/// A tabular model and everything recorded about its data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    kind: EstimatorKind,
    input_dim: usize,
    output_dim: usize,
    feature_cols: Vec<String>,
    label_cols: Vec<String>,
    build_params: Mapping,
    state: ModelState<Estimator>,
    scalers: Option<ScalingTransform>,
}

impl Model {
    pub fn new(kind: EstimatorKind) -> Self {
        Self {
            kind,
            input_dim: 0,
            output_dim: 0,
            feature_cols: Vec::new(),
            label_cols: Vec::new(),
            build_params: Mapping::new(),
            state: ModelState::Unbuilt,
            scalers: None,
        }
    }

    pub fn kind(&self) -> EstimatorKind {
        self.kind
    }

    pub fn state(&self) -> &ModelState<Estimator> {
        &self.state
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn feature_cols(&self) -> &[String] {
        &self.feature_cols
    }

    pub fn label_cols(&self) -> &[String] {
        &self.label_cols
    }

    pub fn build_params(&self) -> &Mapping {
        &self.build_params
    }

    pub fn scalers(&self) -> Option<&ScalingTransform> {
        self.scalers.as_ref()
    }

    pub fn load_csv(&mut self, path: &Path, feature_cols: &[String], label_cols: &[String]) -> Result<Dataset> {
        let dataset = DatasetLoader::new().load_csv(path, feature_cols, label_cols)?;
        self.record_dataset(&dataset);
        Ok(dataset)
    }

    pub fn load_numpy(&mut self, dir: &Path) -> Result<Dataset> {
        let dataset = DatasetLoader::new().load_numpy(dir)?;
        self.record_dataset(&dataset);
        Ok(dataset)
    }

    pub fn load_episodes(&mut self, path: &Path, options: &CsvLoadOptions) -> Result<SplitDataset> {
        let split = DatasetLoader::new().load_episodes(path, options)?;
        self.record_dataset(&split.train);
        Ok(split)
    }

    pub fn load_numpy_splits(&mut self, dir: &Path) -> Result<SplitDataset> {
        let split = DatasetLoader::new().load_numpy_splits(dir)?;
        self.record_dataset(&split.train);
        Ok(split)
    }

    fn record_dataset(&mut self, dataset: &Dataset) {
        self.input_dim = dataset.input_dim();
        self.output_dim = dataset.output_dim();
        self.feature_cols = dataset.feature_cols().to_vec();
        self.label_cols = dataset.label_cols().to_vec();
        debug!(
            rows = dataset.n_rows(),
            input_dim = self.input_dim,
            output_dim = self.output_dim,
            "Recorded dataset dimensions"
        );
    }

    /// Fit a fresh transform on `(x, y)`, keep it, and return the scaled pair
    pub fn scale_data(&mut self, x: &Array2<f64>, y: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>)> {
        let (transform, x_scaled, y_scaled) = ScalingTransform::fit(x, y)?;
        self.scalers = Some(transform);
        Ok((x_scaled, y_scaled))
    }

    /// Construct an unfitted estimator, discarding any fitted one
    pub fn build_model(&mut self, params: &Mapping) -> Result<()> {
        let estimator = self.kind.build(params)?;
        self.build_params = params.clone();
        self.state = ModelState::Built(estimator);
        info!(model = %self.kind, "Model built");
        Ok(())
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array2<f64>, scale_data: bool) -> Result<()> {
        let mut estimator = self.state.built()?.clone();
        if x.nrows() != y.nrows() {
            return Err(DatamodelerError::ShapeError {
                expected: format!("{} label rows", x.nrows()),
                actual: format!("{} label rows", y.nrows()),
            });
        }

        let start = Instant::now();
        let scalers = if scale_data {
            let (transform, x_scaled, y_scaled) = ScalingTransform::fit(x, y)?;
            estimator.fit(&x_scaled, &y_scaled)?;
            Some(transform)
        } else {
            estimator.fit(x, y)?;
            None
        };

        // Commit only once the estimator has fitted
        self.scalers = scalers;
        self.input_dim = x.ncols();
        self.output_dim = y.ncols();
        self.state = ModelState::Fitted(estimator);
        info!(
            model = %self.kind,
            rows = x.nrows(),
            scaled = scale_data,
            secs = start.elapsed().as_secs_f64(),
            "Model fitted"
        );
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>, inverse_transform: bool) -> Result<Array2<f64>> {
        let estimator = self.state.fitted()?;
        if x.ncols() != self.input_dim {
            return Err(DatamodelerError::ShapeError {
                expected: format!("{} input columns", self.input_dim),
                actual: format!("{} input columns", x.ncols()),
            });
        }

        match &self.scalers {
            Some(scalers) => {
                let predictions = estimator.predict(&scalers.x.transform(x)?)?;
                if inverse_transform {
                    scalers.y.inverse_transform(&predictions)
                } else {
                    Ok(predictions)
                }
            }
            None => estimator.predict(x),
        }
    }

    /// Score predictions in original label units
    pub fn evaluate(&self, x: &Array2<f64>, y: &Array2<f64>, metric: Metric) -> Result<f64> {
        self.state.built()?;
        let predictions = self.predict(x, true)?;
        metric.score(y, &predictions)
    }

    /// Run one sweep through `backend`, then refit on all of `(x, y)` with the winning parameters
    pub fn sweep(
        &mut self,
        x: &Array2<f64>,
        y: &Array2<f64>,
        request: &SweepRequest,
        backend: &dyn SearchBackend,
    ) -> Result<TrialTable> {
        self.state.built()?;
        let base_params = self.build_params.clone();

        let task = SearchTask {
            kind: self.kind,
            base_params: &base_params,
            space: &request.space,
            x,
            y,
            metric: request.scoring,
            num_trials: request.num_trials,
            split: &request.split_strategy,
            scale_data: request.scale_data,
        };
        let table = backend.search(&task)?;

        if let Some(path) = &request.results_csv_path {
            table.write_csv(path)?;
            info!(path = %path.display(), "Wrote sweep results");
        }

        let best = table.best().ok_or_else(|| {
            DatamodelerError::ComputationError(format!("all {} sweep trials failed", table.len()))
        })?;
        info!(
            trial = best.trial,
            score = best.mean_score,
            metric = %table.metric(),
            "Best sweep trial"
        );

        let best_params = merge_params(&base_params, &best.params);
        self.build_model(&best_params)?;
        self.fit(x, y, request.scale_data)?;
        Ok(table)
    }

    pub fn save_model(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        info!(path = %path.display(), "Model saved");
        Ok(())
    }

    pub fn load_model(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DatamodelerError::MissingData(path.display().to_string()));
        }
        let reader = BufReader::new(File::open(path)?);
        let model: Self = serde_json::from_reader(reader)?;
        debug!(path = %path.display(), state = model.state.label(), "Model loaded");
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn linear_data() -> (Array2<f64>, Array2<f64>) {
        let x = Array2::from_shape_fn((20, 2), |(r, c)| (r * (c + 1)) as f64 + (r % 3) as f64);
        let y = x.map_axis(ndarray::Axis(1), |row| 3.0 * row[0] - 2.0 * row[1] + 5.0).insert_axis(ndarray::Axis(1));
        (x, y)
    }

    #[test]
    fn test_unbuilt_lifecycle_errors() {
        let mut model = Model::new(EstimatorKind::Linear);
        let (x, y) = linear_data();

        assert!(matches!(model.fit(&x, &y, false), Err(DatamodelerError::ModelNotBuilt)));
        assert!(matches!(model.predict(&x, true), Err(DatamodelerError::ModelNotBuilt)));
        assert!(matches!(model.evaluate(&x, &y, Metric::R2), Err(DatamodelerError::ModelNotBuilt)));
    }

    #[test]
    fn test_predict_before_fit() {
        let mut model = Model::new(EstimatorKind::Ridge);
        model.build_model(&Mapping::new()).unwrap();
        assert!(matches!(model.predict(&array![[1.0, 2.0]], true), Err(DatamodelerError::ModelNotFitted)));
    }

    #[test]
    fn test_fit_predict_evaluate() {
        let mut model = Model::new(EstimatorKind::Linear);
        let (x, y) = linear_data();
        model.build_model(&Mapping::new()).unwrap();
        model.fit(&x, &y, false).unwrap();
        assert!(model.state().is_fitted());

        let predictions = model.predict(&x, true).unwrap();
        assert_eq!(predictions.dim(), (20, 1));
        assert!(model.evaluate(&x, &y, Metric::R2).unwrap() > 0.999);

        assert!(matches!(
            model.predict(&array![[1.0, 2.0, 3.0]], true),
            Err(DatamodelerError::ShapeError { .. })
        ));
    }

    #[test]
    fn test_scaled_fit_returns_original_units() {
        let mut model = Model::new(EstimatorKind::Linear);
        let (x, y) = linear_data();
        model.build_model(&Mapping::new()).unwrap();
        model.fit(&x, &y, true).unwrap();
        assert!(model.scalers().is_some());

        let original = model.predict(&x, true).unwrap();
        for (p, t) in original.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-6);
        }

        let scaled = model.predict(&x, false).unwrap();
        let mean = scaled.mean().unwrap();
        assert!(mean.abs() < 1e-6);

        // unscaled refit drops the transform
        model.fit(&x, &y, false).unwrap();
        assert!(model.scalers().is_none());
    }

    #[test]
    fn test_rebuild_discards_fit() {
        let mut model = Model::new(EstimatorKind::Linear);
        let (x, y) = linear_data();
        model.build_model(&Mapping::new()).unwrap();
        model.fit(&x, &y, false).unwrap();
        model.build_model(&Mapping::new()).unwrap();
        assert_eq!(model.state().label(), "built");
    }

    #[test]
    fn test_row_mismatch() {
        let mut model = Model::new(EstimatorKind::Linear);
        model.build_model(&Mapping::new()).unwrap();
        let result = model.fit(&Array2::zeros((4, 2)), &Array2::zeros((3, 1)), false);
        assert!(matches!(result, Err(DatamodelerError::ShapeError { .. })));
        assert_eq!(model.state().label(), "built");
    }

    #[test]
    fn test_failed_refit_keeps_transform() {
        let mut model = Model::new(EstimatorKind::Linear);
        let (x, y) = linear_data();
        model.build_model(&Mapping::new()).unwrap();
        model.fit(&x, &y, true).unwrap();
        let before = model.predict(&x, true).unwrap();

        let result = model.fit(&Array2::zeros((0, 2)), &Array2::zeros((0, 1)), false);
        assert!(result.is_err());
        assert!(model.scalers().is_some());
        assert_eq!(model.state().label(), "fitted");
        assert_eq!(model.predict(&x, true).unwrap(), before);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("model.json");

        let mut model = Model::new(EstimatorKind::Ridge);
        let (x, y) = linear_data();
        let params: Mapping = serde_yaml::from_str("alpha: 0.5").unwrap();
        model.build_model(&params).unwrap();
        model.fit(&x, &y, true).unwrap();
        model.save_model(&path).unwrap();

        let loaded = Model::load_model(&path).unwrap();
        assert_eq!(loaded.kind(), EstimatorKind::Ridge);
        assert_eq!(loaded.build_params(), &params);
        let a = model.predict(&x, true).unwrap();
        let b = loaded.predict(&x, true).unwrap();
        for (p, q) in a.iter().zip(b.iter()) {
            assert!((p - q).abs() < 1e-9);
        }

        assert!(matches!(
            Model::load_model(&dir.path().join("missing.json")),
            Err(DatamodelerError::MissingData(_))
        ));
    }
}
