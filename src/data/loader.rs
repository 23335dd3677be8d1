//! CSV and NumPy dataset loading

use super::{stack_rows, train_count, Dataset, Episode, SeriesFrame, SplitDataset};
use crate::error::{DatamodelerError, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_npy::read_npy;
use polars::prelude::*;
use std::cmp::Ordering;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

/// Options for turning an episodic CSV into a lag-paired tabular split
#[derive(Debug, Clone)]
pub struct CsvLoadOptions {
    /// State columns used as features
    pub inputs: Vec<String>,
    /// Columns used as labels
    pub outputs: Vec<String>,
    /// Extra feature columns appended after `inputs`
    pub augmented_cols: Vec<String>,
    /// Column renames applied before anything else (old, new)
    pub var_rename: Vec<(String, String)>,
    /// Keep only the first rows; zero keeps everything
    pub max_rows: usize,
    pub episode_col: Option<String>,
    pub iteration_col: Option<String>,
    /// Label offset in iterations; the sign is ignored
    pub iteration_order: i64,
    /// Predict `outputs[t + lag] - outputs[t]` instead of `outputs[t + lag]`
    pub diff_state: bool,
    pub test_perc: f64,
}

impl Default for CsvLoadOptions {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            augmented_cols: Vec::new(),
            var_rename: Vec::new(),
            max_rows: 0,
            episode_col: None,
            iteration_col: None,
            iteration_order: 0,
            diff_state: false,
            test_perc: 0.2,
        }
    }
}

impl CsvLoadOptions {
    pub fn new(inputs: Vec<String>, outputs: Vec<String>) -> Self {
        Self {
            inputs,
            outputs,
            ..Default::default()
        }
    }

    pub fn with_augmented_cols(mut self, cols: Vec<String>) -> Self {
        self.augmented_cols = cols;
        self
    }

    pub fn with_var_rename(mut self, renames: Vec<(String, String)>) -> Self {
        self.var_rename = renames;
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_episodes(mut self, episode_col: impl Into<String>, iteration_col: impl Into<String>) -> Self {
        self.episode_col = Some(episode_col.into());
        self.iteration_col = Some(iteration_col.into());
        self
    }

    pub fn with_iteration_order(mut self, order: i64) -> Self {
        self.iteration_order = order;
        self
    }

    pub fn with_diff_state(mut self, diff_state: bool) -> Self {
        self.diff_state = diff_state;
        self
    }

    pub fn with_test_perc(mut self, test_perc: f64) -> Self {
        self.test_perc = test_perc;
        self
    }

    /// Lag between paired feature and label rows
    pub fn lag(&self) -> usize {
        self.iteration_order.unsigned_abs() as usize
    }

    /// Feature column names in matrix order
    pub fn feature_cols(&self) -> Vec<String> {
        self.inputs
            .iter()
            .chain(self.augmented_cols.iter())
            .cloned()
            .collect()
    }
}

/// Options for loading ordered episodes for a forecaster
#[derive(Debug, Clone)]
pub struct SeriesLoadOptions {
    /// Columns the forecaster predicts
    pub targets: Vec<String>,
    /// Exogenous columns
    pub covariates: Vec<String>,
    pub var_rename: Vec<(String, String)>,
    pub max_rows: usize,
    pub episode_col: Option<String>,
    pub iteration_col: Option<String>,
    pub test_perc: f64,
}

impl Default for SeriesLoadOptions {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            covariates: Vec::new(),
            var_rename: Vec::new(),
            max_rows: 0,
            episode_col: None,
            iteration_col: None,
            test_perc: 0.2,
        }
    }
}

impl SeriesLoadOptions {
    pub fn new(targets: Vec<String>, covariates: Vec<String>) -> Self {
        Self {
            targets,
            covariates,
            ..Default::default()
        }
    }

    pub fn with_var_rename(mut self, renames: Vec<(String, String)>) -> Self {
        self.var_rename = renames;
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_episodes(mut self, episode_col: impl Into<String>, iteration_col: impl Into<String>) -> Self {
        self.episode_col = Some(episode_col.into());
        self.iteration_col = Some(iteration_col.into());
        self
    }

    pub fn with_test_perc(mut self, test_perc: f64) -> Self {
        self.test_perc = test_perc;
        self
    }
}

/// Reads datasets from CSV files and `.npy` arrays
#[derive(Debug, Clone, Default)]
pub struct DatasetLoader {
    /// Rows scanned for schema inference; `None` scans the whole file
    infer_schema_length: Option<usize>,
}

impl DatasetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_infer_schema_length(mut self, rows: usize) -> Self {
        self.infer_schema_length = Some(rows);
        self
    }

    /// Load named feature and label columns from a CSV
    pub fn load_csv(&self, path: &Path, feature_cols: &[String], label_cols: &[String]) -> Result<Dataset> {
        let df = self.read_csv(path)?;
        let x = columns_to_array2(&df, feature_cols)?;
        let y = columns_to_array2(&df, label_cols)?;
        debug!(rows = x.nrows(), path = %path.display(), "Loaded CSV");
        Dataset::new(x, y, feature_cols.to_vec(), label_cols.to_vec())
    }

    /// Load `x_set.npy` and `y_set.npy` from a directory
    pub fn load_numpy(&self, dir: &Path) -> Result<Dataset> {
        let x = read_matrix(&dir.join("x_set.npy"))?;
        let y = read_matrix(&dir.join("y_set.npy"))?;
        Dataset::from_arrays(x, y)
    }

    /// Load pre-split `x_train/y_train/x_test/y_test.npy` from a directory
    pub fn load_numpy_splits(&self, dir: &Path) -> Result<SplitDataset> {
        let train = Dataset::from_arrays(
            read_matrix(&dir.join("x_train.npy"))?,
            read_matrix(&dir.join("y_train.npy"))?,
        )?;
        let test = Dataset::from_arrays(
            read_matrix(&dir.join("x_test.npy"))?,
            read_matrix(&dir.join("y_test.npy"))?,
        )?;
        if train.input_dim() != test.input_dim() || train.output_dim() != test.output_dim() {
            return Err(DatamodelerError::ShapeError {
                expected: format!("test columns {} / {}", train.input_dim(), train.output_dim()),
                actual: format!("{} / {}", test.input_dim(), test.output_dim()),
            });
        }
        Ok(SplitDataset { train, test })
    }

    /// Load an episodic CSV, lag-pair rows within episodes and split train/test
    pub fn load_episodes(&self, path: &Path, options: &CsvLoadOptions) -> Result<SplitDataset> {
        let df = self.read_prepared(path, &options.var_rename, options.max_rows)?;
        let feature_cols = options.feature_cols();
        let label_cols = options.outputs.clone();

        let x_all = columns_to_array2(&df, &feature_cols)?;
        let y_all = columns_to_array2(&df, &label_cols)?;
        let groups = episode_groups(&df, options.episode_col.as_deref(), options.iteration_col.as_deref())?;

        let lag = options.lag();
        let mut pairs: Vec<(Array2<f64>, Array2<f64>)> = Vec::with_capacity(groups.len());
        for rows in &groups {
            if rows.len() <= lag {
                continue;
            }
            let n = rows.len() - lag;
            let x = x_all.select(Axis(0), &rows[..n]);
            let mut y = y_all.select(Axis(0), &rows[lag..]);
            if options.diff_state {
                y -= &y_all.select(Axis(0), &rows[..n]);
            }
            pairs.push((x, y));
        }

        if pairs.is_empty() {
            return Err(DatamodelerError::ValidationError(format!(
                "no rows left after pairing with lag {}",
                lag
            )));
        }

        let split = if pairs.len() > 1 {
            let n_train = train_count(pairs.len(), options.test_perc)?;
            let (train, test) = pairs.split_at(n_train);
            SplitDataset {
                train: assemble(train, &feature_cols, &label_cols)?,
                test: assemble(test, &feature_cols, &label_cols)?,
            }
        } else {
            assemble(&pairs, &feature_cols, &label_cols)?.split(options.test_perc)?
        };

        info!(
            episodes = pairs.len(),
            train_rows = split.train.n_rows(),
            test_rows = split.test.n_rows(),
            "Loaded episodic dataset"
        );
        Ok(split)
    }

    /// Load ordered episodes for a forecaster and split train/test
    pub fn load_series(&self, path: &Path, options: &SeriesLoadOptions) -> Result<(SeriesFrame, SeriesFrame)> {
        let df = self.read_prepared(path, &options.var_rename, options.max_rows)?;
        let targets = columns_to_array2(&df, &options.targets)?;
        let covariates = columns_to_array2(&df, &options.covariates)?;
        let groups = episode_groups(&df, options.episode_col.as_deref(), options.iteration_col.as_deref())?;

        let episodes: Vec<Episode> = groups
            .iter()
            .filter(|rows| !rows.is_empty())
            .map(|rows| Episode {
                targets: targets.select(Axis(0), rows),
                covariates: covariates.select(Axis(0), rows),
            })
            .collect();

        let (train, test) = if episodes.len() > 1 {
            let n_train = train_count(episodes.len(), options.test_perc)?;
            let mut train = episodes;
            let test = train.split_off(n_train);
            (train, test)
        } else {
            let episode = episodes.into_iter().next().ok_or_else(|| {
                DatamodelerError::ValidationError("time-series file has no rows".to_string())
            })?;
            let n_train = train_count(episode.len(), options.test_perc)?;
            let head = Episode {
                targets: episode.targets.slice(ndarray::s![..n_train, ..]).to_owned(),
                covariates: episode.covariates.slice(ndarray::s![..n_train, ..]).to_owned(),
            };
            let tail = Episode {
                targets: episode.targets.slice(ndarray::s![n_train.., ..]).to_owned(),
                covariates: episode.covariates.slice(ndarray::s![n_train.., ..]).to_owned(),
            };
            (vec![head], vec![tail])
        };

        Ok((
            SeriesFrame::new(train, options.targets.clone(), options.covariates.clone())?,
            SeriesFrame::new(test, options.targets.clone(), options.covariates.clone())?,
        ))
    }

    fn read_csv(&self, path: &Path) -> Result<DataFrame> {
        if !path.exists() {
            return Err(DatamodelerError::MissingData(path.display().to_string()));
        }
        let file = File::open(path)?;
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(self.infer_schema_length)
            .into_reader_with_file_handle(file)
            .finish()?;
        Ok(df)
    }

    /// Read, rename and truncate
    fn read_prepared(&self, path: &Path, renames: &[(String, String)], max_rows: usize) -> Result<DataFrame> {
        let mut df = self.read_csv(path)?;
        for (old, new) in renames {
            if df.get_column_index(old).is_some() {
                df.rename(old, new.as_str().into())?;
            } else {
                debug!(column = %old, "Rename source column not present, skipping");
            }
        }
        if max_rows > 0 && df.height() > max_rows {
            df = df.head(Some(max_rows));
        }
        Ok(df)
    }
}

fn assemble(parts: &[(Array2<f64>, Array2<f64>)], feature_cols: &[String], label_cols: &[String]) -> Result<Dataset> {
    let xs: Vec<ArrayView2<f64>> = parts.iter().map(|(x, _)| x.view()).collect();
    let ys: Vec<ArrayView2<f64>> = parts.iter().map(|(_, y)| y.view()).collect();
    Dataset::new(
        stack_rows(&xs, feature_cols.len())?,
        stack_rows(&ys, label_cols.len())?,
        feature_cols.to_vec(),
        label_cols.to_vec(),
    )
}

/// Extract a column as `f64`; nulls become NaN
fn column_f64(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = df
        .column(name)
        .map_err(|_| DatamodelerError::FeatureNotFound(name.to_string()))?;
    let series = column.as_materialized_series().strict_cast(&DataType::Float64)?;
    let values = series.f64()?;
    Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// Stack named columns into an (n_rows, n_cols) matrix
fn columns_to_array2(df: &DataFrame, names: &[String]) -> Result<Array2<f64>> {
    let mut matrix = Array2::<f64>::zeros((df.height(), names.len()));
    for (j, name) in names.iter().enumerate() {
        let values = column_f64(df, name)?;
        matrix.column_mut(j).assign(&Array1::from_vec(values));
    }
    Ok(matrix)
}

/// Episode grouping key, numeric when the column casts cleanly
enum EpisodeKeys {
    Numeric(Vec<f64>),
    Text(Vec<String>),
}

impl EpisodeKeys {
    fn read(df: &DataFrame, name: &str) -> Result<Self> {
        if let Ok(values) = column_f64(df, name) {
            return Ok(EpisodeKeys::Numeric(values));
        }
        let column = df
            .column(name)
            .map_err(|_| DatamodelerError::FeatureNotFound(name.to_string()))?;
        let series = column.as_materialized_series().cast(&DataType::String)?;
        let values = series
            .str()?
            .into_iter()
            .map(|v| v.unwrap_or_default().to_string())
            .collect();
        Ok(EpisodeKeys::Text(values))
    }

    fn cmp(&self, a: usize, b: usize) -> Ordering {
        match self {
            EpisodeKeys::Numeric(v) => v[a].total_cmp(&v[b]),
            EpisodeKeys::Text(v) => v[a].cmp(&v[b]),
        }
    }

    fn same(&self, a: usize, b: usize) -> bool {
        self.cmp(a, b) == Ordering::Equal
    }
}

/// Row indices per episode, sorted by (episode, iteration)
fn episode_groups(df: &DataFrame, episode_col: Option<&str>, iteration_col: Option<&str>) -> Result<Vec<Vec<usize>>> {
    let mut rows: Vec<usize> = (0..df.height()).collect();
    let iterations = iteration_col.map(|c| column_f64(df, c)).transpose()?;

    let Some(episode_col) = episode_col else {
        if let Some(it) = &iterations {
            rows.sort_by(|&a, &b| it[a].total_cmp(&it[b]));
        }
        return Ok(vec![rows]);
    };

    let keys = EpisodeKeys::read(df, episode_col)?;
    // sort_by is stable, so file order breaks ties
    rows.sort_by(|&a, &b| {
        keys.cmp(a, b).then_with(|| match &iterations {
            Some(it) => it[a].total_cmp(&it[b]),
            None => Ordering::Equal,
        })
    });

    let mut groups: Vec<Vec<usize>> = Vec::new();
    for row in rows {
        match groups.last_mut() {
            Some(group) if keys.same(group[0], row) => group.push(row),
            _ => groups.push(vec![row]),
        }
    }
    Ok(groups)
}

/// Read a 2-D `.npy`; 1-D arrays become a single column
fn read_matrix(path: &Path) -> Result<Array2<f64>> {
    if !path.exists() {
        return Err(DatamodelerError::MissingData(path.display().to_string()));
    }
    match read_npy::<_, Array2<f64>>(path) {
        Ok(matrix) => Ok(matrix),
        Err(_) => {
            let vector: Array1<f64> = read_npy(path)?;
            Ok(vector.insert_axis(Axis(1)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    const EPISODES: &str = "episode,iteration,s,a,extra\n\
        2,1,20,0.2,9\n\
        1,2,11,0.1,9\n\
        1,1,10,0.0,9\n\
        1,3,12,0.2,9\n\
        2,0,19,0.1,9\n\
        3,0,30,0.3,9\n";

    #[test]
    fn test_load_csv_selects_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "d.csv", "f1,f2,label,unused\n1,2,3,x\n4,5,6,y\n");

        let ds = DatasetLoader::new()
            .load_csv(&path, &names(&["f2", "f1"]), &names(&["label"]))
            .unwrap();
        assert_eq!(ds.x().dim(), (2, 2));
        assert_eq!(ds.x()[[1, 0]], 5.0);
        assert_eq!(ds.y()[[1, 0]], 6.0);
    }

    #[test]
    fn test_missing_path_is_missing_data() {
        let err = DatasetLoader::new()
            .load_csv(Path::new("/nonexistent/data.csv"), &names(&["a"]), &names(&["b"]))
            .unwrap_err();
        assert!(matches!(err, DatamodelerError::MissingData(_)));
    }

    #[test]
    fn test_unknown_column_is_feature_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "d.csv", "a,b\n1,2\n");
        let err = DatasetLoader::new()
            .load_csv(&path, &names(&["a"]), &names(&["zz"]))
            .unwrap_err();
        assert!(matches!(err, DatamodelerError::FeatureNotFound(c) if c == "zz"));
    }

    #[test]
    fn test_non_numeric_column_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "d.csv", "a,b\n1,x\n2,y\n");
        let err = DatasetLoader::new()
            .load_csv(&path, &names(&["a"]), &names(&["b"]))
            .unwrap_err();
        assert!(matches!(err, DatamodelerError::DataError(_)));
    }

    #[test]
    fn test_lag_pairing_stays_within_episodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "ep.csv", EPISODES);

        let options = CsvLoadOptions::new(names(&["s", "a"]), names(&["s"]))
            .with_episodes("episode", "iteration")
            .with_iteration_order(-1)
            .with_test_perc(0.5);
        let split = DatasetLoader::new().load_episodes(&path, &options).unwrap();

        // Episode 1 has 3 rows -> 2 pairs, episode 2 has 2 rows -> 1 pair, episode 3 -> none
        assert_eq!(split.train.n_rows() + split.test.n_rows(), 3);
        // Two contributing episodes, floor(0.5 * 2) = 1 trains
        assert_eq!(split.train.n_rows(), 2);
        assert_eq!(split.train.x().column(0).to_vec(), vec![10.0, 11.0]);
        assert_eq!(split.train.y().column(0).to_vec(), vec![11.0, 12.0]);
        assert_eq!(split.test.x()[[0, 0]], 19.0);
        assert_eq!(split.test.y()[[0, 0]], 20.0);
    }

    #[test]
    fn test_diff_state_and_augmented_cols() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "ep.csv", EPISODES);

        let options = CsvLoadOptions::new(names(&["s"]), names(&["s"]))
            .with_augmented_cols(names(&["a"]))
            .with_episodes("episode", "iteration")
            .with_iteration_order(1)
            .with_diff_state(true)
            .with_test_perc(0.5);
        let split = DatasetLoader::new().load_episodes(&path, &options).unwrap();

        assert_eq!(split.train.feature_cols(), &names(&["s", "a"])[..]);
        assert!(split.train.y().iter().all(|d| *d == 1.0));
    }

    #[test]
    fn test_rename_and_max_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "d.csv", "old,t\n1,2\n3,4\n5,6\n7,8\n");

        let options = CsvLoadOptions::new(names(&["new"]), names(&["t"]))
            .with_var_rename(vec![("old".into(), "new".into())])
            .with_max_rows(3)
            .with_test_perc(0.34);
        let split = DatasetLoader::new().load_episodes(&path, &options).unwrap();

        // Single episode: floor(0.66 * 3) = 1 train row
        assert_eq!(split.train.n_rows(), 1);
        assert_eq!(split.test.n_rows(), 2);
        assert_eq!(split.test.x()[[1, 0]], 5.0);
    }

    #[test]
    fn test_numpy_round_trip_with_1d_labels() {
        let dir = tempfile::tempdir().unwrap();
        let x = Array2::from_shape_fn((4, 3), |(r, c)| (r * 3 + c) as f64);
        let y = Array1::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        ndarray_npy::write_npy(dir.path().join("x_set.npy"), &x).unwrap();
        ndarray_npy::write_npy(dir.path().join("y_set.npy"), &y).unwrap();

        let ds = DatasetLoader::new().load_numpy(dir.path()).unwrap();
        assert_eq!(ds.x(), &x);
        assert_eq!(ds.y().dim(), (4, 1));
        assert_eq!(ds.label_cols(), &names(&["y0"])[..]);
    }

    #[test]
    fn test_numpy_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = DatasetLoader::new().load_numpy(dir.path()).unwrap_err();
        assert!(matches!(err, DatamodelerError::MissingData(_)));
    }

    #[test]
    fn test_load_series_splits_episodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "ep.csv", EPISODES);

        let options = SeriesLoadOptions::new(names(&["s"]), names(&["a"]))
            .with_episodes("episode", "iteration")
            .with_test_perc(0.34);
        let (train, test) = DatasetLoader::new().load_series(&path, &options).unwrap();

        assert_eq!(train.len(), 1);
        assert_eq!(test.len(), 2);
        assert_eq!(train.episodes()[0].targets.column(0).to_vec(), vec![10.0, 11.0, 12.0]);
        assert_eq!(test.episodes()[0].targets.column(0).to_vec(), vec![19.0, 20.0]);
    }
}
