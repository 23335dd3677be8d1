//! Dataset containers, loading and persistence
//!
//! - [`Dataset`] pairs a feature matrix with a label matrix and their column names
//! - [`SeriesFrame`] holds ordered episodes for the time-series models
//! - [`DatasetLoader`] reads CSV and `.npy` inputs into either shape
//! - [`DatasetSaver`] writes train/test splits back out

mod loader;
mod saver;

pub use loader::{CsvLoadOptions, DatasetLoader, SeriesLoadOptions};
pub use saver::DatasetSaver;

use crate::error::{DatamodelerError, Result};
use ndarray::{concatenate, s, Array2, ArrayView2, Axis};

/// Feature and label matrices with matching row counts
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    x: Array2<f64>,
    y: Array2<f64>,
    feature_cols: Vec<String>,
    label_cols: Vec<String>,
}

impl Dataset {
    pub fn new(
        x: Array2<f64>,
        y: Array2<f64>,
        feature_cols: Vec<String>,
        label_cols: Vec<String>,
    ) -> Result<Self> {
        if x.nrows() != y.nrows() {
            return Err(DatamodelerError::ShapeError {
                expected: format!("{} label rows", x.nrows()),
                actual: format!("{} label rows", y.nrows()),
            });
        }
        if x.ncols() != feature_cols.len() {
            return Err(DatamodelerError::ShapeError {
                expected: format!("{} feature columns", feature_cols.len()),
                actual: format!("{} feature columns", x.ncols()),
            });
        }
        if y.ncols() != label_cols.len() {
            return Err(DatamodelerError::ShapeError {
                expected: format!("{} label columns", label_cols.len()),
                actual: format!("{} label columns", y.ncols()),
            });
        }
        Ok(Self {
            x,
            y,
            feature_cols,
            label_cols,
        })
    }

    /// Wrap bare arrays, naming columns `x0..` and `y0..`
    pub fn from_arrays(x: Array2<f64>, y: Array2<f64>) -> Result<Self> {
        let feature_cols = generated_names("x", x.ncols());
        let label_cols = generated_names("y", y.ncols());
        Self::new(x, y, feature_cols, label_cols)
    }

    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    pub fn y(&self) -> &Array2<f64> {
        &self.y
    }

    pub fn feature_cols(&self) -> &[String] {
        &self.feature_cols
    }

    pub fn label_cols(&self) -> &[String] {
        &self.label_cols
    }

    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }

    pub fn input_dim(&self) -> usize {
        self.x.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.y.ncols()
    }

    pub fn into_arrays(self) -> (Array2<f64>, Array2<f64>) {
        (self.x, self.y)
    }

    /// Sequential split: the leading rows train, the rest test
    pub fn split(&self, test_perc: f64) -> Result<SplitDataset> {
        let n_train = train_count(self.n_rows(), test_perc)?;
        Ok(SplitDataset {
            train: self.slice_rows(0, n_train),
            test: self.slice_rows(n_train, self.n_rows()),
        })
    }

    fn slice_rows(&self, start: usize, end: usize) -> Dataset {
        Dataset {
            x: self.x.slice(s![start..end, ..]).to_owned(),
            y: self.y.slice(s![start..end, ..]).to_owned(),
            feature_cols: self.feature_cols.clone(),
            label_cols: self.label_cols.clone(),
        }
    }
}

/// Train and test halves of a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct SplitDataset {
    pub train: Dataset,
    pub test: Dataset,
}

impl SplitDataset {
    /// Percentage of rows held out for testing
    pub fn test_fraction(&self) -> f64 {
        let total = self.train.n_rows() + self.test.n_rows();
        if total == 0 {
            0.0
        } else {
            self.test.n_rows() as f64 / total as f64
        }
    }
}

/// One ordered run of iterations
#[derive(Debug, Clone, PartialEq)]
pub struct Episode {
    /// Series the forecaster predicts, one column per label
    pub targets: Array2<f64>,
    /// Exogenous inputs aligned row-by-row with `targets`
    pub covariates: Array2<f64>,
}

impl Episode {
    pub fn len(&self) -> usize {
        self.targets.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.nrows() == 0
    }
}

/// Ordered episodes for the time-series models
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesFrame {
    episodes: Vec<Episode>,
    label_cols: Vec<String>,
    feature_cols: Vec<String>,
}

impl SeriesFrame {
    pub fn new(
        episodes: Vec<Episode>,
        label_cols: Vec<String>,
        feature_cols: Vec<String>,
    ) -> Result<Self> {
        for (i, episode) in episodes.iter().enumerate() {
            if episode.targets.ncols() != label_cols.len()
                || episode.covariates.ncols() != feature_cols.len()
                || episode.covariates.nrows() != episode.targets.nrows()
            {
                return Err(DatamodelerError::ShapeError {
                    expected: format!(
                        "episode {}: n x {} targets and n x {} covariates",
                        i,
                        label_cols.len(),
                        feature_cols.len()
                    ),
                    actual: format!(
                        "{:?} targets and {:?} covariates",
                        episode.targets.dim(),
                        episode.covariates.dim()
                    ),
                });
            }
        }
        Ok(Self {
            episodes,
            label_cols,
            feature_cols,
        })
    }

    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    pub fn label_cols(&self) -> &[String] {
        &self.label_cols
    }

    pub fn feature_cols(&self) -> &[String] {
        &self.feature_cols
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    /// Total number of rows across episodes
    pub fn n_rows(&self) -> usize {
        self.episodes.iter().map(Episode::len).sum()
    }

    pub fn output_dim(&self) -> usize {
        self.label_cols.len()
    }

    pub fn covariate_dim(&self) -> usize {
        self.feature_cols.len()
    }

    /// All targets stacked in episode order
    pub fn stacked_targets(&self) -> Result<Array2<f64>> {
        let views: Vec<ArrayView2<f64>> = self.episodes.iter().map(|e| e.targets.view()).collect();
        stack_rows(&views, self.output_dim())
    }
}

/// Number of leading rows (or episodes) that train under `test_perc`
///
/// Both sides always keep at least one item.
pub(crate) fn train_count(n: usize, test_perc: f64) -> Result<usize> {
    if !(0.0..1.0).contains(&test_perc) {
        return Err(DatamodelerError::ValidationError(format!(
            "test_perc must lie in [0, 1), got {}",
            test_perc
        )));
    }
    if n < 2 {
        return Err(DatamodelerError::ValidationError(format!(
            "need at least 2 rows to split, got {}",
            n
        )));
    }
    let n_train = ((1.0 - test_perc) * n as f64).floor() as usize;
    Ok(n_train.clamp(1, n - 1))
}

pub(crate) fn generated_names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{}{}", prefix, i)).collect()
}

/// Vertical concatenation that tolerates an empty list
pub(crate) fn stack_rows(parts: &[ArrayView2<f64>], n_cols: usize) -> Result<Array2<f64>> {
    if parts.is_empty() {
        return Ok(Array2::zeros((0, n_cols)));
    }
    Ok(concatenate(Axis(0), parts)?)
}
