//! K-Nearest Neighbors regression
//!
//! Multi-output targets are handled natively: the neighbor search runs once per
//! query row and every label column is averaged over the same neighbor set.

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{DatamodelerError, Result};

/// Distance metric for neighbor search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Euclidean distance (L2)
    #[default]
    Euclidean,
    /// Manhattan distance (L1)
    Manhattan,
    /// Minkowski distance with parameter p
    Minkowski(f64),
    /// Cosine similarity converted to a distance
    Cosine,
}

/// Weighting scheme for neighbors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WeightScheme {
    /// All neighbors have equal weight
    #[default]
    Uniform,
    /// Inverse-distance weighting
    Distance,
}

/// KNN build parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KNNConfig {
    /// Number of neighbors
    pub n_neighbors: usize,
    pub metric: DistanceMetric,
    pub weights: WeightScheme,
}

impl Default for KNNConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            metric: DistanceMetric::Euclidean,
            weights: WeightScheme::Uniform,
        }
    }
}

/// K-Nearest Neighbors Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNNRegressor {
    config: KNNConfig,
    x_train: Option<Array2<f64>>,
    y_train: Option<Array2<f64>>,
}

impl KNNRegressor {
    pub fn new(config: KNNConfig) -> Result<Self> {
        if config.n_neighbors == 0 {
            return Err(DatamodelerError::InvalidParameter {
                name: "n_neighbors".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            config,
            x_train: None,
            y_train: None,
        })
    }

    /// Create with default config and specified k
    pub fn with_k(k: usize) -> Result<Self> {
        Self::new(KNNConfig {
            n_neighbors: k,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &KNNConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.x_train.is_some()
    }

    /// Store the training data
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
        if x.nrows() != y.nrows() {
            return Err(DatamodelerError::ShapeError {
                expected: format!("{} label rows", x.nrows()),
                actual: format!("{} label rows", y.nrows()),
            });
        }
        if x.nrows() == 0 {
            return Err(DatamodelerError::ValidationError(
                "cannot fit on an empty dataset".to_string(),
            ));
        }
        self.x_train = Some(x.clone());
        self.y_train = Some(y.clone());
        Ok(())
    }

    /// Predict every label column (parallelized over query rows)
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (x_train, y_train) = match (&self.x_train, &self.y_train) {
            (Some(xt), Some(yt)) => (xt, yt),
            _ => return Err(DatamodelerError::ModelNotFitted),
        };
        if x.ncols() != x_train.ncols() {
            return Err(DatamodelerError::ShapeError {
                expected: format!("{} features", x_train.ncols()),
                actual: format!("{} features", x.ncols()),
            });
        }

        let k = self.config.n_neighbors.min(x_train.nrows());
        let metric = self.config.metric;
        let weights = self.config.weights;

        let rows: Vec<Array1<f64>> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let neighbors = find_k_nearest(x.row(i), x_train, k, metric);
                weighted_mean_rows(&neighbors, y_train, weights)
            })
            .collect();

        let n_outputs = y_train.ncols();
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Ok(Array2::from_shape_vec((x.nrows(), n_outputs), flat)?)
    }
}

/// Max-heap entry keyed on distance; carries the training row index
#[derive(PartialEq)]
struct Neighbor(f64, usize);

impl Eq for Neighbor {}
impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .partial_cmp(&other.0)
            .unwrap_or(Ordering::Equal)
            .then(self.1.cmp(&other.1))
    }
}

/// Keep the k smallest distances with a bounded max-heap, O(n log k)
fn find_k_nearest(
    point: ArrayView1<f64>,
    x_train: &Array2<f64>,
    k: usize,
    metric: DistanceMetric,
) -> Vec<(f64, usize)> {
    let mut heap = BinaryHeap::with_capacity(k + 1);

    for (i, row) in x_train.rows().into_iter().enumerate() {
        let dist = compute_distance(point, row, metric);
        if heap.len() < k {
            heap.push(Neighbor(dist, i));
        } else if let Some(top) = heap.peek() {
            if dist < top.0 {
                heap.pop();
                heap.push(Neighbor(dist, i));
            }
        }
    }

    heap.into_iter().map(|n| (n.0, n.1)).collect()
}

fn compute_distance(a: ArrayView1<f64>, b: ArrayView1<f64>, metric: DistanceMetric) -> f64 {
    let pairs = a.iter().zip(b.iter());
    match metric {
        DistanceMetric::Euclidean => pairs.map(|(ai, bi)| (ai - bi).powi(2)).sum::<f64>().sqrt(),
        DistanceMetric::Manhattan => pairs.map(|(ai, bi)| (ai - bi).abs()).sum(),
        DistanceMetric::Minkowski(p) => pairs
            .map(|(ai, bi)| (ai - bi).abs().powf(p))
            .sum::<f64>()
            .powf(1.0 / p),
        DistanceMetric::Cosine => {
            let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
            for (ai, bi) in pairs {
                dot += ai * bi;
                norm_a += ai * ai;
                norm_b += bi * bi;
            }
            let denom = norm_a.sqrt() * norm_b.sqrt();
            if denom > 0.0 {
                1.0 - dot / denom
            } else {
                1.0
            }
        }
    }
}

fn weighted_mean_rows(
    neighbors: &[(f64, usize)],
    y_train: &Array2<f64>,
    weights: WeightScheme,
) -> Array1<f64> {
    // An exact match dominates inverse-distance weighting
    let exact: Vec<usize> = neighbors
        .iter()
        .filter(|(d, _)| *d == 0.0)
        .map(|(_, i)| *i)
        .collect();

    let weighted: Vec<(f64, usize)> = match weights {
        WeightScheme::Distance if !exact.is_empty() => exact.iter().map(|&i| (1.0, i)).collect(),
        WeightScheme::Distance => neighbors.iter().map(|&(d, i)| (1.0 / d, i)).collect(),
        WeightScheme::Uniform => neighbors.iter().map(|&(_, i)| (1.0, i)).collect(),
    };

    let mut acc = Array1::<f64>::zeros(y_train.ncols());
    let mut total = 0.0;
    for (w, i) in weighted {
        acc.scaled_add(w, &y_train.row(i));
        total += w;
    }
    if total > 0.0 {
        acc /= total;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn create_regression_data() -> (Array2<f64>, Array2<f64>) {
        let x = Array2::from_shape_vec((10, 2), (0..20).map(|i| i as f64).collect()).unwrap();
        let y = Array2::from_shape_fn((10, 2), |(r, c)| {
            let sum = x[[r, 0]] + x[[r, 1]];
            if c == 0 {
                sum
            } else {
                -sum
            }
        });
        (x, y)
    }

    #[test]
    fn test_knn_regressor_multi_output() {
        let (x, y) = create_regression_data();
        let mut knn = KNNRegressor::with_k(1).unwrap();
        knn.fit(&x, &y).unwrap();

        let predictions = knn.predict(&x).unwrap();
        assert_eq!(predictions.dim(), (10, 2));
        assert_eq!(predictions, y);
    }

    #[test]
    fn test_uniform_average_of_neighbors() {
        let x = array![[0.0], [1.0], [10.0]];
        let y = array![[2.0], [4.0], [100.0]];
        let mut knn = KNNRegressor::with_k(2).unwrap();
        knn.fit(&x, &y).unwrap();

        let pred = knn.predict(&array![[0.4]]).unwrap();
        assert!((pred[[0, 0]] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_distance_weighting_prefers_closer() {
        let x = array![[0.0], [1.0]];
        let y = array![[0.0], [10.0]];
        let config = KNNConfig {
            n_neighbors: 2,
            weights: WeightScheme::Distance,
            ..Default::default()
        };
        let mut knn = KNNRegressor::new(config).unwrap();
        knn.fit(&x, &y).unwrap();

        let pred = knn.predict(&array![[0.9]]).unwrap();
        assert!(pred[[0, 0]] > 5.0);
    }

    #[test]
    fn test_k_larger_than_training_set() {
        let x = array![[0.0], [2.0]];
        let y = array![[1.0], [3.0]];
        let mut knn = KNNRegressor::with_k(5).unwrap();
        knn.fit(&x, &y).unwrap();
        let pred = knn.predict(&array![[1.0]]).unwrap();
        assert!((pred[[0, 0]] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_neighbors_rejected() {
        assert!(KNNRegressor::with_k(0).is_err());
    }

    #[test]
    fn test_predict_before_fit() {
        let knn = KNNRegressor::with_k(3).unwrap();
        assert!(matches!(
            knn.predict(&array![[1.0]]),
            Err(DatamodelerError::ModelNotFitted)
        ));
    }

    #[test]
    fn test_config_from_yaml() {
        let config: KNNConfig =
            serde_yaml::from_str("n_neighbors: 3\nweights: distance\nmetric: manhattan").unwrap();
        assert_eq!(config.n_neighbors, 3);
        assert_eq!(config.weights, WeightScheme::Distance);
        assert_eq!(config.metric, DistanceMetric::Manhattan);

        let bad: std::result::Result<KNNConfig, _> = serde_yaml::from_str("leaf_size: 30");
        assert!(bad.is_err());
    }
}
