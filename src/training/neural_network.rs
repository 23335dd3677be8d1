//! Multi-layer perceptron regressor
//!
//! A feedforward network trained with mini-batch SGD plus momentum. The output
//! layer is linear and has one unit per label column, so multi-output targets
//! are learned jointly.

use ndarray::{s, Array1, Array2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DatamodelerError, Result};

/// Hidden-layer activation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Relu,
    Sigmoid,
    Tanh,
    /// Identity
    Linear,
}

impl Activation {
    fn apply(&self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv(|v| v.max(0.0)),
            Activation::Sigmoid => z.mapv(|v| 1.0 / (1.0 + (-v).exp())),
            Activation::Tanh => z.mapv(f64::tanh),
            Activation::Linear => z.clone(),
        }
    }

    fn derivative(&self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Sigmoid => z.mapv(|v| {
                let s = 1.0 / (1.0 + (-v).exp());
                s * (1.0 - s)
            }),
            Activation::Tanh => z.mapv(|v| 1.0 - v.tanh().powi(2)),
            Activation::Linear => Array2::ones(z.raw_dim()),
        }
    }
}

/// MLP build parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MLPConfig {
    /// Hidden layer sizes
    pub hidden_layers: Vec<usize>,
    pub activation: Activation,
    pub learning_rate: f64,
    pub max_epochs: usize,
    pub batch_size: usize,
    /// L2 weight decay
    pub alpha: f64,
    /// Seed for initialization and shuffling; entropy when unset
    pub random_state: Option<u64>,
    /// Epochs without validation improvement before stopping
    pub early_stopping_patience: usize,
    /// Trailing fraction of the training rows held out for early stopping
    pub validation_split: f64,
    pub momentum: f64,
}

impl Default for MLPConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![64],
            activation: Activation::Relu,
            learning_rate: 0.01,
            max_epochs: 200,
            batch_size: 32,
            alpha: 0.0001,
            random_state: Some(42),
            early_stopping_patience: 10,
            validation_split: 0.1,
            momentum: 0.9,
        }
    }
}

impl MLPConfig {
    fn validate(&self) -> Result<()> {
        let invalid = |name: &str, value: String, reason: &str| DatamodelerError::InvalidParameter {
            name: name.to_string(),
            value,
            reason: reason.to_string(),
        };
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "0".into(), "must be at least 1"));
        }
        if self.hidden_layers.contains(&0) {
            return Err(invalid(
                "hidden_layers",
                format!("{:?}", self.hidden_layers),
                "layer sizes must be positive",
            ));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(invalid(
                "validation_split",
                self.validation_split.to_string(),
                "must lie in [0, 1)",
            ));
        }
        if self.learning_rate <= 0.0 {
            return Err(invalid(
                "learning_rate",
                self.learning_rate.to_string(),
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Per-layer weight and bias gradients
type Gradients = Vec<(Array2<f64>, Array1<f64>)>;

/// Multi-Layer Perceptron Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLPRegressor {
    config: MLPConfig,
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
    n_features: usize,
    is_fitted: bool,
}

impl MLPRegressor {
    pub fn new(config: MLPConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            weights: Vec::new(),
            biases: Vec::new(),
            n_features: 0,
            is_fitted: false,
        })
    }

    pub fn config(&self) -> &MLPConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
        let n_samples = x.nrows();
        if n_samples != y.nrows() {
            return Err(DatamodelerError::ShapeError {
                expected: format!("{} label rows", n_samples),
                actual: format!("{} label rows", y.nrows()),
            });
        }
        if n_samples == 0 {
            return Err(DatamodelerError::ValidationError(
                "cannot fit on an empty dataset".to_string(),
            ));
        }

        self.n_features = x.ncols();
        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        self.initialize_weights(y.ncols(), &mut rng);

        let val_size = ((n_samples as f64 * self.config.validation_split) as usize)
            .min(n_samples - 1);
        let train_size = n_samples - val_size;

        let x_train = x.slice(s![..train_size, ..]);
        let y_train = y.slice(s![..train_size, ..]);
        let x_val = x.slice(s![train_size.., ..]).to_owned();
        let y_val = y.slice(s![train_size.., ..]).to_owned();

        let mut velocities_w: Vec<Array2<f64>> =
            self.weights.iter().map(|w| Array2::zeros(w.raw_dim())).collect();
        let mut velocities_b: Vec<Array1<f64>> =
            self.biases.iter().map(|b| Array1::zeros(b.len())).collect();

        let decay = 1.0 - self.config.alpha * self.config.learning_rate;
        let mut best_val_loss = f64::INFINITY;
        let mut patience_counter = 0;
        let mut indices: Vec<usize> = (0..train_size).collect();

        for epoch in 0..self.config.max_epochs {
            indices.shuffle(&mut rng);

            for batch in indices.chunks(self.config.batch_size) {
                let x_batch = x_train.select(Axis(0), batch);
                let y_batch = y_train.select(Axis(0), batch);

                let (activations, z_values) = self.forward(&x_batch);
                let gradients = self.backward(&y_batch, &activations, &z_values);

                for (i, (grad_w, grad_b)) in gradients.into_iter().enumerate() {
                    velocities_w[i] = &velocities_w[i] * self.config.momentum
                        - &grad_w * self.config.learning_rate;
                    velocities_b[i] = &velocities_b[i] * self.config.momentum
                        - &grad_b * self.config.learning_rate;

                    self.weights[i] += &velocities_w[i];
                    self.biases[i] += &velocities_b[i];
                    self.weights[i] *= decay;
                }
            }

            if val_size > 0 {
                let val_loss = mse(&y_val, &self.output(&x_val));
                if val_loss < best_val_loss {
                    best_val_loss = val_loss;
                    patience_counter = 0;
                } else {
                    patience_counter += 1;
                    if patience_counter >= self.config.early_stopping_patience {
                        debug!(epoch, val_loss, "MLP early stopping");
                        break;
                    }
                }
            }
        }

        self.is_fitted = true;
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.is_fitted {
            return Err(DatamodelerError::ModelNotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(DatamodelerError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(self.output(x))
    }

    fn initialize_weights(&mut self, n_outputs: usize, rng: &mut Xoshiro256PlusPlus) {
        self.weights.clear();
        self.biases.clear();

        let mut layer_sizes = vec![self.n_features];
        layer_sizes.extend(&self.config.hidden_layers);
        layer_sizes.push(n_outputs);

        for pair in layer_sizes.windows(2) {
            let (n_in, n_out) = (pair[0], pair[1]);
            // Xavier/Glorot uniform
            let limit = (6.0 / (n_in + n_out) as f64).sqrt();
            let weights = Array2::from_shape_fn((n_in, n_out), |_| rng.gen_range(-limit..limit));
            self.weights.push(weights);
            self.biases.push(Array1::zeros(n_out));
        }
    }

    fn output(&self, x: &Array2<f64>) -> Array2<f64> {
        let (mut activations, _) = self.forward(x);
        activations.pop().unwrap_or_else(|| x.clone())
    }

    fn forward(&self, x: &Array2<f64>) -> (Vec<Array2<f64>>, Vec<Array2<f64>>) {
        let n_layers = self.weights.len();
        let mut activations = vec![x.clone()];
        let mut z_values = Vec::with_capacity(n_layers);

        for (i, (w, b)) in self.weights.iter().zip(self.biases.iter()).enumerate() {
            let z = activations[i].dot(w) + b;
            let a = if i + 1 < n_layers {
                self.config.activation.apply(&z)
            } else {
                z.clone()
            };
            z_values.push(z);
            activations.push(a);
        }

        (activations, z_values)
    }

    fn backward(
        &self,
        y: &Array2<f64>,
        activations: &[Array2<f64>],
        z_values: &[Array2<f64>],
    ) -> Gradients {
        let n = y.nrows() as f64;
        let mut gradients = Vec::with_capacity(self.weights.len());

        // MSE gradient at the linear output
        let mut delta = (&activations[self.weights.len()] - y) / n;

        for i in (0..self.weights.len()).rev() {
            let grad_w = activations[i].t().dot(&delta);
            let grad_b = delta.sum_axis(Axis(0));
            gradients.push((grad_w, grad_b));

            if i > 0 {
                delta = delta.dot(&self.weights[i].t())
                    * self.config.activation.derivative(&z_values[i - 1]);
            }
        }

        gradients.reverse();
        gradients
    }
}

fn mse(y_true: &Array2<f64>, y_pred: &Array2<f64>) -> f64 {
    (y_true - y_pred).mapv(|e| e * e).mean().unwrap_or(f64::INFINITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> MLPConfig {
        MLPConfig {
            hidden_layers: vec![8],
            max_epochs: 300,
            batch_size: 8,
            validation_split: 0.0,
            ..Default::default()
        }
    }

    fn linear_data() -> (Array2<f64>, Array2<f64>) {
        let x = Array2::from_shape_fn((40, 2), |(r, c)| (r as f64 / 40.0) + c as f64 * 0.5);
        let y = Array2::from_shape_fn((40, 2), |(r, c)| {
            let v = 2.0 * x[[r, 0]] - x[[r, 1]];
            if c == 0 {
                v
            } else {
                -v
            }
        });
        (x, y)
    }

    #[test]
    fn test_mlp_learns_multi_output() {
        let (x, y) = linear_data();
        let mut mlp = MLPRegressor::new(small_config()).unwrap();
        mlp.fit(&x, &y).unwrap();

        let pred = mlp.predict(&x).unwrap();
        assert_eq!(pred.dim(), (40, 2));

        let baseline = y.mapv(|v| v * v).mean().unwrap();
        assert!(mse(&y, &pred) < baseline);
    }

    #[test]
    fn test_seeded_fit_is_reproducible() {
        let (x, y) = linear_data();
        let mut a = MLPRegressor::new(small_config()).unwrap();
        let mut b = MLPRegressor::new(small_config()).unwrap();
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_predict_before_fit() {
        let mlp = MLPRegressor::new(MLPConfig::default()).unwrap();
        let x = Array2::zeros((2, 2));
        assert!(matches!(mlp.predict(&x), Err(DatamodelerError::ModelNotFitted)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = MLPConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(MLPRegressor::new(config).is_err());
    }
}
