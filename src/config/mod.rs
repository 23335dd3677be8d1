//! Run configuration
//!
//! A run is described by a composed YAML tree with two sections, `data` and
//! `model`. [`ConfigLoader`] composes the tree from a primary file, its
//! `defaults` groups and command-line overrides; [`RunConfig::from_value`]
//! checks the required keys and reads the rest leniently, so keys this crate
//! does not use are ignored.

mod loader;

pub use loader::{deep_merge, parse_override, ConfigLoader, Override};

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::PathBuf;

use crate::data::{CsvLoadOptions, SeriesLoadOptions};
use crate::error::{DatamodelerError, Result};
use crate::training::DEFAULT_TIME_SERIES_MODELS;

/// Keys that must be present in every run configuration
pub const REQUIRED_KEYS: [&str; 6] = [
    "model.name",
    "model.saver.filename",
    "model.sweep.run",
    "model.sweep.split_strategy",
    "model.sweep.results_csv_path",
    "data.full_or_relative",
];

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Column names given either as a list or as a mapping keyed by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnSpec {
    One(String),
    List(Vec<String>),
    Map(Mapping),
}

impl ColumnSpec {
    /// Plain names; a mapping contributes its keys in file order
    pub fn names(&self) -> Result<Vec<String>> {
        match self {
            ColumnSpec::One(name) => Ok(vec![name.clone()]),
            ColumnSpec::List(names) => Ok(names.clone()),
            ColumnSpec::Map(map) => map
                .keys()
                .map(|key| match key {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    other => Err(DatamodelerError::ConfigError(format!(
                        "column names must be strings, got {:?}",
                        other
                    ))),
                })
                .collect(),
        }
    }
}

fn column_names(spec: &Option<ColumnSpec>) -> Result<Vec<String>> {
    spec.as_ref().map(ColumnSpec::names).transpose().map(Option::unwrap_or_default)
}

/// How `data.path` is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMode {
    /// Used as given
    Full,
    /// Joined to the base directory
    Relative,
}

/// On-disk dataset layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    #[default]
    Csv,
    /// `x_set.npy` / `y_set.npy`, split sequentially
    Numpy,
    /// `x_train/y_train/x_test/y_test.npy`
    NumpySplit,
}

/// `data` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    pub full_or_relative: PathMode,
    #[serde(default, deserialize_with = "null_as_default")]
    pub format: DataFormat,
    #[serde(default)]
    pub inputs: Option<ColumnSpec>,
    #[serde(default)]
    pub outputs: Option<ColumnSpec>,
    #[serde(default)]
    pub augmented_cols: Option<ColumnSpec>,
    #[serde(default)]
    pub iteration_order: Option<i64>,
    #[serde(default)]
    pub episode_col: Option<String>,
    #[serde(default)]
    pub iteration_col: Option<String>,
    /// Non-positive keeps every row
    #[serde(default)]
    pub max_rows: Option<i64>,
    #[serde(default)]
    pub test_perc: Option<f64>,
    #[serde(default)]
    pub diff_state: Option<bool>,
    /// old name -> new name
    #[serde(default)]
    pub var_rename: Option<Mapping>,
    /// Accepted for compatibility, never applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preprocess: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exogeneous_variables: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exogeneous_save_path: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_values_save_path: Option<Value>,
}

impl DataConfig {
    pub fn inputs(&self) -> Result<Vec<String>> {
        column_names(&self.inputs)
    }

    pub fn outputs(&self) -> Result<Vec<String>> {
        column_names(&self.outputs)
    }

    pub fn augmented_cols(&self) -> Result<Vec<String>> {
        column_names(&self.augmented_cols)
    }

    /// Names of set `data` keys that have no effect on a run
    pub fn ignored_keys(&self) -> Vec<&'static str> {
        [
            ("preprocess", &self.preprocess),
            ("exogeneous_variables", &self.exogeneous_variables),
            ("exogeneous_save_path", &self.exogeneous_save_path),
            ("initial_values_save_path", &self.initial_values_save_path),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_ref().is_some_and(|v| !v.is_null()))
        .map(|(name, _)| name)
        .collect()
    }

    pub fn test_perc(&self) -> f64 {
        self.test_perc.unwrap_or(0.2)
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows.filter(|n| *n > 0).map_or(0, |n| n as usize)
    }

    pub fn renames(&self) -> Result<Vec<(String, String)>> {
        let Some(map) = &self.var_rename else {
            return Ok(Vec::new());
        };
        map.iter()
            .map(|(old, new)| match (old.as_str(), new.as_str()) {
                (Some(old), Some(new)) => Ok((old.to_string(), new.to_string())),
                _ => Err(DatamodelerError::ConfigError(
                    "data.var_rename must map column names to column names".to_string(),
                )),
            })
            .collect()
    }

    /// Loader options for the tabular path
    pub fn csv_options(&self) -> Result<CsvLoadOptions> {
        let mut options = CsvLoadOptions::new(self.inputs()?, self.outputs()?)
            .with_augmented_cols(self.augmented_cols()?)
            .with_var_rename(self.renames()?)
            .with_max_rows(self.max_rows())
            .with_iteration_order(self.iteration_order.unwrap_or(1))
            .with_diff_state(self.diff_state.unwrap_or(false))
            .with_test_perc(self.test_perc());
        options.episode_col = self.episode_col.clone();
        options.iteration_col = self.iteration_col.clone();
        Ok(options)
    }

    /// Loader options for the time-series path
    pub fn series_options(&self) -> Result<SeriesLoadOptions> {
        let mut options = SeriesLoadOptions::new(self.outputs()?, self.augmented_cols()?)
            .with_var_rename(self.renames()?)
            .with_max_rows(self.max_rows())
            .with_test_perc(self.test_perc());
        options.episode_col = self.episode_col.clone();
        options.iteration_col = self.iteration_col.clone();
        Ok(options)
    }
}

/// `model.saver` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaverConfig {
    pub filename: PathBuf,
}

/// `model.sweep` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub run: bool,
    /// Integer fold count, a splitter name, or a tagged mapping
    pub split_strategy: Value,
    pub results_csv_path: Option<PathBuf>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub params: Mapping,
    #[serde(default)]
    pub search_algorithm: Option<String>,
    #[serde(default)]
    pub num_trials: Option<usize>,
    #[serde(default)]
    pub scoring_func: Option<String>,
    #[serde(default)]
    pub random_state: Option<u64>,
}

/// `model` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub build_params: Mapping,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fit_params: Mapping,
    #[serde(default, deserialize_with = "null_as_default")]
    pub predict_params: Mapping,
    #[serde(default)]
    pub scale_data: Option<bool>,
    /// Names routed to the forecasters
    #[serde(default)]
    pub time_series_models: Option<Vec<String>>,
    pub saver: SaverConfig,
    pub sweep: SweepConfig,
}

impl ModelConfig {
    pub fn scale_data(&self) -> bool {
        self.scale_data.unwrap_or(false)
    }

    pub fn time_series_models(&self) -> Vec<String> {
        self.time_series_models
            .clone()
            .unwrap_or_else(|| DEFAULT_TIME_SERIES_MODELS.iter().map(|s| s.to_string()).collect())
    }
}

/// Fully composed run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
}

impl RunConfig {
    /// Check required keys, then read the typed sections
    pub fn from_value(value: Value) -> Result<Self> {
        for key in REQUIRED_KEYS {
            if lookup(&value, key).is_none() {
                return Err(DatamodelerError::ConfigError(format!("missing required key '{}'", key)));
            }
        }
        Ok(serde_yaml::from_value(value)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_value(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Follow a dotted key path through nested mappings
pub fn lookup<'a>(value: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .try_fold(value, |node, key| node.as_mapping()?.get(key))
}
