//! Cross-validation splitters for sweeps

use crate::error::{DatamodelerError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// How sweep trials split the training data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SplitStrategy {
    /// K-Fold cross-validation
    #[serde(rename = "kfold")]
    KFold {
        n_splits: usize,
        #[serde(default)]
        shuffle: bool,
        #[serde(default)]
        random_state: Option<u64>,
    },
    /// Expanding-window split that respects row order
    #[serde(rename = "timeseries")]
    TimeSeries {
        n_splits: usize,
        #[serde(default)]
        max_train_size: Option<usize>,
    },
}

impl Default for SplitStrategy {
    fn default() -> Self {
        SplitStrategy::KFold {
            n_splits: 5,
            shuffle: false,
            random_state: None,
        }
    }
}

/// A single train/test split
#[derive(Debug, Clone)]
pub struct CVSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
}

impl SplitStrategy {
    /// Read a strategy from configuration.
    ///
    /// Accepts an integer (k-fold with that many splits), a bare name
    /// (`kfold` or `timeseries`, five splits), or a tagged mapping.
    pub fn from_value(value: &Value) -> Result<Self> {
        let invalid = |reason: String| DatamodelerError::InvalidParameter {
            name: "split_strategy".to_string(),
            value: serde_yaml::to_string(value).unwrap_or_default().trim().to_string(),
            reason,
        };

        let strategy = match value {
            Value::Number(n) => {
                let n_splits = n
                    .as_u64()
                    .ok_or_else(|| invalid("fold count must be a positive integer".to_string()))?;
                SplitStrategy::KFold {
                    n_splits: n_splits as usize,
                    shuffle: false,
                    random_state: None,
                }
            }
            Value::String(name) => match name.to_lowercase().as_str() {
                "kfold" | "k_fold" => SplitStrategy::default(),
                "timeseries" | "time_series" | "timeseriessplit" => SplitStrategy::TimeSeries {
                    n_splits: 5,
                    max_train_size: None,
                },
                other => return Err(invalid(format!("unknown split strategy '{}'", other))),
            },
            Value::Mapping(_) => {
                serde_yaml::from_value(value.clone()).map_err(|e| invalid(e.to_string()))?
            }
            _ => return Err(invalid("expected an integer, a name or a mapping".to_string())),
        };

        if strategy.n_splits() < 2 {
            return Err(invalid("n_splits must be at least 2".to_string()));
        }
        Ok(strategy)
    }

    pub fn n_splits(&self) -> usize {
        match self {
            SplitStrategy::KFold { n_splits, .. } | SplitStrategy::TimeSeries { n_splits, .. } => {
                *n_splits
            }
        }
    }

    /// Generate train/test index splits over `n_samples` rows
    pub fn split(&self, n_samples: usize) -> Result<Vec<CVSplit>> {
        match self {
            SplitStrategy::KFold {
                n_splits,
                shuffle,
                random_state,
            } => k_fold_split(n_samples, *n_splits, *shuffle, *random_state),
            SplitStrategy::TimeSeries {
                n_splits,
                max_train_size,
            } => time_series_split(n_samples, *n_splits, *max_train_size),
        }
    }
}

fn k_fold_split(
    n_samples: usize,
    n_splits: usize,
    shuffle: bool,
    random_state: Option<u64>,
) -> Result<Vec<CVSplit>> {
    if n_splits < 2 {
        return Err(DatamodelerError::ValidationError(
            "n_splits must be at least 2".to_string(),
        ));
    }
    if n_samples < n_splits {
        return Err(DatamodelerError::ValidationError(format!(
            "n_samples ({}) must be >= n_splits ({})",
            n_samples, n_splits
        )));
    }

    let mut indices: Vec<usize> = (0..n_samples).collect();
    if shuffle {
        let mut rng = match random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        indices.shuffle(&mut rng);
    }

    let base = n_samples / n_splits;
    let remainder = n_samples % n_splits;
    let mut splits = Vec::with_capacity(n_splits);
    let mut current = 0;

    for fold_idx in 0..n_splits {
        let fold_size = if fold_idx < remainder { base + 1 } else { base };
        let test_indices = indices[current..current + fold_size].to_vec();
        let train_indices = indices[..current]
            .iter()
            .chain(&indices[current + fold_size..])
            .copied()
            .collect();

        splits.push(CVSplit {
            train_indices,
            test_indices,
            fold_idx,
        });
        current += fold_size;
    }

    Ok(splits)
}

fn time_series_split(
    n_samples: usize,
    n_splits: usize,
    max_train_size: Option<usize>,
) -> Result<Vec<CVSplit>> {
    if n_splits < 2 {
        return Err(DatamodelerError::ValidationError(
            "n_splits must be at least 2".to_string(),
        ));
    }
    let test_size = n_samples / (n_splits + 1);
    if test_size == 0 {
        return Err(DatamodelerError::ValidationError(format!(
            "n_samples ({}) too small for {} time-series splits",
            n_samples, n_splits
        )));
    }

    // The remainder goes to the first training window
    let offset = n_samples - test_size * n_splits;
    let splits = (0..n_splits)
        .map(|fold_idx| {
            let test_start = offset + fold_idx * test_size;
            let train_start = max_train_size.map_or(0, |max| test_start.saturating_sub(max));
            CVSplit {
                train_indices: (train_start..test_start).collect(),
                test_indices: (test_start..test_start + test_size).collect(),
                fold_idx,
            }
        })
        .collect();

    Ok(splits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_k_fold_covers_every_row_once() {
        let splits = SplitStrategy::default().split(12).unwrap();
        assert_eq!(splits.len(), 5);

        let mut seen: Vec<usize> = splits.iter().flat_map(|s| s.test_indices.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..12).collect::<Vec<_>>());

        for split in &splits {
            assert_eq!(split.train_indices.len() + split.test_indices.len(), 12);
        }
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let strategy = SplitStrategy::KFold {
            n_splits: 3,
            shuffle: true,
            random_state: Some(7),
        };
        let a = strategy.split(30).unwrap();
        let b = strategy.split(30).unwrap();
        assert_eq!(a[0].test_indices, b[0].test_indices);
    }

    #[test]
    fn test_time_series_split_trains_on_past_only() {
        let strategy = SplitStrategy::TimeSeries {
            n_splits: 3,
            max_train_size: None,
        };
        let splits = strategy.split(10).unwrap();
        assert_eq!(splits.len(), 3);
        for split in &splits {
            let last_train = *split.train_indices.last().unwrap();
            assert!(last_train < split.test_indices[0]);
        }
        assert_eq!(*splits[2].test_indices.last().unwrap(), 9);
    }

    #[test]
    fn test_from_value_forms() {
        let folds: Value = serde_yaml::from_str("3").unwrap();
        assert_eq!(SplitStrategy::from_value(&folds).unwrap().n_splits(), 3);

        let named: Value = serde_yaml::from_str("timeseries").unwrap();
        assert!(matches!(
            SplitStrategy::from_value(&named).unwrap(),
            SplitStrategy::TimeSeries { n_splits: 5, .. }
        ));

        let tagged: Value =
            serde_yaml::from_str("type: kfold\nn_splits: 4\nshuffle: true\nrandom_state: 1").unwrap();
        assert_eq!(
            SplitStrategy::from_value(&tagged).unwrap(),
            SplitStrategy::KFold {
                n_splits: 4,
                shuffle: true,
                random_state: Some(1)
            }
        );

        let one: Value = serde_yaml::from_str("1").unwrap();
        assert!(SplitStrategy::from_value(&one).is_err());
    }

    #[test]
    fn test_too_few_samples() {
        assert!(SplitStrategy::default().split(3).is_err());
    }
}
