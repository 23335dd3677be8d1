//! Sweep execution: the search backend seam, grid/random search and trial tables

use ndarray::{Array2, Axis};
use polars::prelude::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::cross_validation::{CVSplit, SplitStrategy};
use super::search_space::{merge_params, SweepSpace};
use crate::error::{DatamodelerError, Result};
use crate::preprocessing::ScalingTransform;
use crate::training::{EstimatorKind, Metric};

/// Everything a backend needs to run a sweep
#[derive(Debug, Clone, Copy)]
pub struct SearchTask<'a> {
    pub kind: EstimatorKind,
    /// Build parameters every trial starts from
    pub base_params: &'a Mapping,
    pub space: &'a SweepSpace,
    pub x: &'a Array2<f64>,
    pub y: &'a Array2<f64>,
    pub metric: Metric,
    /// Trial budget; zero means the whole grid
    pub num_trials: usize,
    pub split: &'a SplitStrategy,
    pub scale_data: bool,
}

/// Runs every trial of a sweep and reports the results
pub trait SearchBackend {
    fn search(&self, task: &SearchTask<'_>) -> Result<TrialTable>;
}

/// Order in which grid points are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchAlgorithm {
    /// Grid points in order
    #[default]
    Grid,
    /// Grid points sampled without replacement
    Random,
}

impl FromStr for SearchAlgorithm {
    type Err = DatamodelerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "grid" | "grid_search" | "gridsearch" => Ok(SearchAlgorithm::Grid),
            "random" | "random_search" | "randomsearch" => Ok(SearchAlgorithm::Random),
            other => Err(DatamodelerError::InvalidParameter {
                name: "search_algorithm".to_string(),
                value: other.to_string(),
                reason: "expected 'grid' or 'random'".to_string(),
            }),
        }
    }
}

/// Exhaustive grid search, optionally randomly subsampled
#[derive(Debug, Clone, Default)]
pub struct GridSearch {
    algorithm: SearchAlgorithm,
    random_state: Option<u64>,
}

impl GridSearch {
    pub fn new(algorithm: SearchAlgorithm) -> Self {
        Self {
            algorithm,
            random_state: None,
        }
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Grid points to evaluate under the trial budget
    fn candidates(&self, space: &SweepSpace, num_trials: usize) -> Vec<Mapping> {
        let total = space.len();
        let budget = if num_trials == 0 {
            total
        } else {
            num_trials.min(total)
        };

        match self.algorithm {
            SearchAlgorithm::Grid => (0..budget).filter_map(|i| space.point(i)).collect(),
            SearchAlgorithm::Random => {
                let mut rng = match self.random_state {
                    Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
                    None => Xoshiro256PlusPlus::from_entropy(),
                };
                rand::seq::index::sample(&mut rng, total, budget)
                    .into_iter()
                    .filter_map(|i| space.point(i))
                    .collect()
            }
        }
    }
}

impl SearchBackend for GridSearch {
    fn search(&self, task: &SearchTask<'_>) -> Result<TrialTable> {
        if task.space.is_empty() {
            return Err(DatamodelerError::InvalidParameter {
                name: "sweep.params".to_string(),
                value: "{}".to_string(),
                reason: "nothing to sweep".to_string(),
            });
        }

        let splits = task.split.split(task.x.nrows())?;
        let candidates = self.candidates(task.space, task.num_trials);
        info!(
            "Sweeping {} of {} configurations with {} folds",
            candidates.len(),
            task.space.len(),
            splits.len()
        );

        let mut table = TrialTable::new(task.metric);
        for (trial, params) in candidates.into_iter().enumerate() {
            let start = Instant::now();
            let outcome = evaluate_trial(task, &params, &splits);
            let duration_secs = start.elapsed().as_secs_f64();

            let record = match outcome {
                Ok(fold_scores) => {
                    let record = TrialRecord::complete(trial, params, fold_scores, duration_secs);
                    debug!(trial, score = record.mean_score, "trial complete");
                    record
                }
                Err(e) => {
                    warn!(trial, error = %e, "Sweep trial failed");
                    TrialRecord::failed(trial, params, e.to_string(), duration_secs)
                }
            };
            table.push(record);
        }

        Ok(table)
    }
}

/// Cross-validated scores of one parameter set, in original label units
fn evaluate_trial(task: &SearchTask<'_>, params: &Mapping, splits: &[CVSplit]) -> Result<Vec<f64>> {
    let merged = merge_params(task.base_params, params);

    splits
        .iter()
        .map(|split| {
            let x_train = task.x.select(Axis(0), &split.train_indices);
            let y_train = task.y.select(Axis(0), &split.train_indices);
            let x_test = task.x.select(Axis(0), &split.test_indices);
            let y_test = task.y.select(Axis(0), &split.test_indices);

            let mut estimator = task.kind.build(&merged)?;
            let y_pred = if task.scale_data {
                let (transform, x_scaled, y_scaled) = ScalingTransform::fit(&x_train, &y_train)?;
                estimator.fit(&x_scaled, &y_scaled)?;
                let scaled = estimator.predict(&transform.x.transform(&x_test)?)?;
                transform.y.inverse_transform(&scaled)?
            } else {
                estimator.fit(&x_train, &y_train)?;
                estimator.predict(&x_test)?
            };

            task.metric.score(&y_test, &y_pred)
        })
        .collect()
}

/// Outcome of a trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrialStatus {
    Complete,
    Failed(String),
}

impl TrialStatus {
    fn label(&self) -> &str {
        match self {
            TrialStatus::Complete => "complete",
            TrialStatus::Failed(_) => "failed",
        }
    }
}

/// One row of the trial table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial: usize,
    pub params: Mapping,
    pub fold_scores: Vec<f64>,
    /// NaN for failed trials
    pub mean_score: f64,
    pub std_score: f64,
    pub duration_secs: f64,
    pub status: TrialStatus,
}

impl TrialRecord {
    pub fn complete(trial: usize, params: Mapping, fold_scores: Vec<f64>, duration_secs: f64) -> Self {
        let n = fold_scores.len().max(1) as f64;
        let mean = fold_scores.iter().sum::<f64>() / n;
        let var = fold_scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        Self {
            trial,
            params,
            fold_scores,
            mean_score: mean,
            std_score: var.sqrt(),
            duration_secs,
            status: TrialStatus::Complete,
        }
    }

    pub fn failed(trial: usize, params: Mapping, reason: String, duration_secs: f64) -> Self {
        Self {
            trial,
            params,
            fold_scores: Vec::new(),
            mean_score: f64::NAN,
            std_score: f64::NAN,
            duration_secs,
            status: TrialStatus::Failed(reason),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == TrialStatus::Complete
    }
}

/// Results of a sweep, one record per attempted configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialTable {
    metric: Metric,
    trials: Vec<TrialRecord>,
}

impl TrialTable {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            trials: Vec::new(),
        }
    }

    pub fn push(&mut self, record: TrialRecord) {
        self.trials.push(record);
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn trials(&self) -> &[TrialRecord] {
        &self.trials
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// Best completed trial under the metric's direction
    pub fn best(&self) -> Option<&TrialRecord> {
        let sign = if self.metric.greater_is_better() { 1.0 } else { -1.0 };
        self.trials
            .iter()
            .filter(|t| t.is_complete() && t.mean_score.is_finite())
            .max_by(|a, b| {
                (sign * a.mean_score)
                    .partial_cmp(&(sign * b.mean_score))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Tabular view: trial, one `param_<name>` column per swept parameter, scores, status
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut param_names: Vec<String> = Vec::new();
        for record in &self.trials {
            for key in record.params.keys() {
                let name = value_to_string(key);
                if !param_names.contains(&name) {
                    param_names.push(name);
                }
            }
        }

        let mut columns: Vec<Column> = Vec::with_capacity(param_names.len() + 5);
        let trial_ids: Vec<u32> = self.trials.iter().map(|t| t.trial as u32).collect();
        columns.push(Series::new("trial".into(), trial_ids).into());

        for name in &param_names {
            let values: Vec<String> = self
                .trials
                .iter()
                .map(|t| {
                    t.params
                        .get(name.as_str())
                        .map(value_to_string)
                        .unwrap_or_default()
                })
                .collect();
            columns.push(Series::new(format!("param_{}", name).into(), values).into());
        }

        let mean: Vec<f64> = self.trials.iter().map(|t| t.mean_score).collect();
        let std: Vec<f64> = self.trials.iter().map(|t| t.std_score).collect();
        let duration: Vec<f64> = self.trials.iter().map(|t| t.duration_secs).collect();
        let status: Vec<String> = self
            .trials
            .iter()
            .map(|t| t.status.label().to_string())
            .collect();

        columns.push(Series::new(format!("mean_{}", self.metric).into(), mean).into());
        columns.push(Series::new(format!("std_{}", self.metric).into(), std).into());
        columns.push(Series::new("duration_secs".into(), duration).into());
        columns.push(Series::new("status".into(), status).into());

        Ok(DataFrame::new(columns)?)
    }

    /// Write the table as CSV, creating parent directories
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut df = self.to_dataframe()?;
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file).finish(&mut df)?;
        Ok(())
    }
}

impl fmt::Display for TrialTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_dataframe() {
            Ok(df) => write!(f, "{}", df),
            Err(_) => write!(f, "TrialTable({} trials)", self.trials.len()),
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_data() -> (Array2<f64>, Array2<f64>) {
        let x = Array2::from_shape_fn((30, 2), |(r, c)| (r * (c + 1)) as f64 * 0.1);
        let y = Array2::from_shape_fn((30, 1), |(r, _)| 3.0 * x[[r, 0]] - x[[r, 1]] + 1.0);
        (x, y)
    }

    fn space(yaml: &str) -> SweepSpace {
        SweepSpace::from_mapping(&serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    #[test]
    fn test_grid_search_runs_every_point() {
        let (x, y) = task_data();
        let space = space("alpha: [0.001, 0.1, 10.0]");
        let base = Mapping::new();
        let split = SplitStrategy::default();
        let task = SearchTask {
            kind: EstimatorKind::Ridge,
            base_params: &base,
            space: &space,
            x: &x,
            y: &y,
            metric: Metric::R2,
            num_trials: 3,
            split: &split,
            scale_data: false,
        };

        let table = GridSearch::default().search(&task).unwrap();
        assert_eq!(table.len(), 3);
        assert!(table.trials().iter().all(|t| t.is_complete()));

        let best = table.best().unwrap();
        assert_eq!(best.params["alpha"].as_f64(), Some(0.001));
    }

    #[test]
    fn test_budget_caps_trials() {
        let (x, y) = task_data();
        let space = space("n_neighbors: [1, 2, 3, 4]\nweights: [uniform, distance]");
        let base = Mapping::new();
        let split = SplitStrategy::default();
        let task = SearchTask {
            kind: EstimatorKind::Knn,
            base_params: &base,
            space: &space,
            x: &x,
            y: &y,
            metric: Metric::Mse,
            num_trials: 3,
            split: &split,
            scale_data: true,
        };

        let table = GridSearch::new(SearchAlgorithm::Random)
            .with_random_state(11)
            .search(&task)
            .unwrap();
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_failed_trials_are_recorded() {
        let (x, y) = task_data();
        let space = space("alpha: [0.1, -5.0]");
        let base = Mapping::new();
        let split = SplitStrategy::default();
        let task = SearchTask {
            kind: EstimatorKind::Lasso,
            base_params: &base,
            space: &space,
            x: &x,
            y: &y,
            metric: Metric::R2,
            num_trials: 0,
            split: &split,
            scale_data: false,
        };

        let table = GridSearch::default().search(&task).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.trials()[1].mean_score.is_nan());
        assert_eq!(table.best().unwrap().trial, 0);
    }

    #[test]
    fn test_trial_table_csv() {
        let mut table = TrialTable::new(Metric::Mae);
        let params: Mapping = serde_yaml::from_str("alpha: 0.5").unwrap();
        table.push(TrialRecord::complete(0, params.clone(), vec![0.2, 0.4], 0.01));
        table.push(TrialRecord::failed(1, params, "boom".to_string(), 0.0));

        assert!((table.trials()[0].mean_score - 0.3).abs() < 1e-12);

        let df = table.to_dataframe().unwrap();
        assert_eq!(df.height(), 2);
        assert!(df.column("param_alpha").is_ok());
        assert!(df.column("mean_mae").is_ok());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweeps").join("results.csv");
        table.write_csv(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_search_algorithm_from_str() {
        assert_eq!("Grid".parse::<SearchAlgorithm>().unwrap(), SearchAlgorithm::Grid);
        assert_eq!("random".parse::<SearchAlgorithm>().unwrap(), SearchAlgorithm::Random);
        assert!("bayes".parse::<SearchAlgorithm>().is_err());
    }
}
