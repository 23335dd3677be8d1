//! Train/test split persistence

use super::{Dataset, SplitDataset};
use crate::error::{DatamodelerError, Result};
use ndarray::Array2;
use ndarray_npy::write_npy;
use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes splits as `.npy` arrays and CSV mirrors
#[derive(Debug, Clone)]
pub struct DatasetSaver {
    dir: PathBuf,
}

impl DatasetSaver {
    /// Save under `dir`, created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `x_train.npy`, `y_train.npy`, `x_test.npy`, `y_test.npy`
    pub fn save_npy(&self, split: &SplitDataset) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.dir)?;
        let mut written = Vec::with_capacity(4);
        for (name, matrix) in Self::parts(split) {
            let path = self.dir.join(format!("{}.npy", name));
            write_npy(&path, matrix)?;
            written.push(path);
        }
        debug!(dir = %self.dir.display(), "Wrote npy splits");
        Ok(written)
    }

    /// Write `x_train.csv`, `x_test.csv`, `y_train.csv`, `y_test.csv` with column headers
    pub fn save_csv(&self, split: &SplitDataset) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.dir)?;
        let outputs: [(&str, &Array2<f64>, &[String]); 4] = [
            ("x_train", split.train.x(), split.train.feature_cols()),
            ("x_test", split.test.x(), split.test.feature_cols()),
            ("y_train", split.train.y(), split.train.label_cols()),
            ("y_test", split.test.y(), split.test.label_cols()),
        ];

        let mut written = Vec::with_capacity(4);
        for (name, matrix, columns) in outputs {
            let path = self.dir.join(format!("{}.csv", name));
            write_matrix_csv(&path, matrix, columns)?;
            written.push(path);
        }
        debug!(dir = %self.dir.display(), "Wrote CSV splits");
        Ok(written)
    }

    fn parts(split: &SplitDataset) -> [(&'static str, &Array2<f64>); 4] {
        [
            ("x_train", split.train.x()),
            ("y_train", split.train.y()),
            ("x_test", split.test.x()),
            ("y_test", split.test.y()),
        ]
    }
}

/// Write a matrix as CSV with the given header, no index column
pub fn write_matrix_csv(path: &Path, matrix: &Array2<f64>, columns: &[String]) -> Result<()> {
    let mut df = matrix_to_dataframe(matrix, columns)?;
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).finish(&mut df)?;
    Ok(())
}

fn matrix_to_dataframe(matrix: &Array2<f64>, columns: &[String]) -> Result<DataFrame> {
    if matrix.ncols() != columns.len() {
        return Err(DatamodelerError::ShapeError {
            expected: format!("{} columns", columns.len()),
            actual: format!("{} columns", matrix.ncols()),
        });
    }
    let series: Vec<Column> = columns
        .iter()
        .zip(matrix.columns())
        .map(|(name, values)| Series::new(name.as_str().into(), values.to_vec()).into())
        .collect();
    Ok(DataFrame::new(series)?)
}

impl Dataset {
    /// Tabular view with feature columns followed by label columns
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut x = matrix_to_dataframe(self.x(), self.feature_cols())?;
        let y = matrix_to_dataframe(self.y(), self.label_cols())?;
        x.hstack_mut(y.get_columns())?;
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DatasetLoader;
    use ndarray::array;

    fn split() -> SplitDataset {
        let train = Dataset::new(
            array![[1.0, 2.0], [3.0, 4.0]],
            array![[0.5], [1.5]],
            vec!["f1".into(), "f2".into()],
            vec!["label".into()],
        )
        .unwrap();
        let test = Dataset::new(
            array![[5.0, 6.0]],
            array![[2.5]],
            vec!["f1".into(), "f2".into()],
            vec!["label".into()],
        )
        .unwrap();
        SplitDataset { train, test }
    }

    #[test]
    fn test_npy_splits_reload() {
        let dir = tempfile::tempdir().unwrap();
        let saver = DatasetSaver::new(dir.path().join("data"));
        let written = saver.save_npy(&split()).unwrap();
        assert_eq!(written.len(), 4);

        let reloaded = DatasetLoader::new().load_numpy_splits(saver.dir()).unwrap();
        assert_eq!(reloaded.train.x(), split().train.x());
        assert_eq!(reloaded.test.y(), split().test.y());
    }

    #[test]
    fn test_csv_mirrors_have_headers() {
        let dir = tempfile::tempdir().unwrap();
        let saver = DatasetSaver::new(dir.path());
        saver.save_csv(&split()).unwrap();

        let contents = fs::read_to_string(dir.path().join("x_train.csv")).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("f1,f2"));
        assert_eq!(lines.count(), 2);

        let labels = fs::read_to_string(dir.path().join("y_test.csv")).unwrap();
        assert!(labels.starts_with("label\n"));
    }

    #[test]
    fn test_dataset_to_dataframe() {
        let df = split().train.to_dataframe().unwrap();
        assert_eq!(df.width(), 3);
        assert_eq!(df.height(), 2);
    }
}
