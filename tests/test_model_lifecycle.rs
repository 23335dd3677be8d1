//! Integration tests for the tabular model lifecycle

use datamodeler::error::DatamodelerError;
use datamodeler::training::{EstimatorKind, Metric, Model, ModelFamily, ModelRegistry, DEFAULT_TIME_SERIES_MODELS};
use ndarray::{Array2, Axis};
use serde_yaml::Mapping;

fn regression_data(n: usize) -> (Array2<f64>, Array2<f64>) {
    let x = Array2::from_shape_fn((n, 2), |(r, c)| if c == 0 { r as f64 * 0.1 } else { ((r * 7) % 11) as f64 });
    let y = x
        .map_axis(Axis(1), |row| 4.0 * row[0] - 0.5 * row[1] + 100.0)
        .insert_axis(Axis(1));
    (x, y)
}

fn params(yaml: &str) -> Mapping {
    serde_yaml::from_str(yaml).unwrap()
}

#[test]
fn test_unbuilt_model_rejects_lifecycle_calls() {
    let (x, y) = regression_data(10);
    for kind in [EstimatorKind::Linear, EstimatorKind::Knn, EstimatorKind::Mlp] {
        let mut model = Model::new(kind);
        assert!(matches!(model.fit(&x, &y, false), Err(DatamodelerError::ModelNotBuilt)));
        assert!(matches!(model.predict(&x, true), Err(DatamodelerError::ModelNotBuilt)));
        assert!(matches!(model.evaluate(&x, &y, Metric::R2), Err(DatamodelerError::ModelNotBuilt)));
    }
}

#[test]
fn test_every_registered_regressor_fits_and_predicts() {
    let (x, y) = regression_data(60);
    let registry = ModelRegistry::new();
    let build = [
        ("linear_model", "{}"),
        ("ridge", "alpha: 0.1"),
        ("lasso", "alpha: 0.001"),
        ("knn", "n_neighbors: 3"),
        ("pytorch", "hidden_layers: [8]\nmax_epochs: 20\nrandom_state: 1"),
    ];

    for (name, yaml) in build {
        let family = ModelFamily::resolve(name, &DEFAULT_TIME_SERIES_MODELS);
        let kind = registry.estimator(name, family).unwrap();
        let mut model = Model::new(kind);
        model.build_model(&params(yaml)).unwrap();
        model.fit(&x, &y, true).unwrap();
        assert!(model.state().is_fitted(), "{} not fitted", name);

        let predictions = model.predict(&x, true).unwrap();
        assert_eq!(predictions.dim(), (60, 1), "{} prediction shape", name);
        assert!(predictions.iter().all(|v| v.is_finite()), "{} produced non-finite values", name);
    }
}

#[test]
fn test_inverse_transform_restores_label_units() {
    let (x, y) = regression_data(40);
    let mut model = Model::new(EstimatorKind::Ridge);
    model.build_model(&params("alpha: 0.0001")).unwrap();
    model.fit(&x, &y, true).unwrap();

    let original = model.predict(&x, true).unwrap();
    let scaled = model.predict(&x, false).unwrap();
    // labels sit around 100, their standardized values around 0
    assert!(original.mean().unwrap() > 90.0);
    assert!(scaled.mean().unwrap().abs() < 1e-6);
    assert!(model.evaluate(&x, &y, Metric::R2).unwrap() > 0.999);
}

#[test]
fn test_ill_typed_build_params() {
    let mut model = Model::new(EstimatorKind::Knn);
    let result = model.build_model(&params("n_neighbors: five"));
    assert!(matches!(result, Err(DatamodelerError::InvalidParameter { .. })));
    assert!(!model.state().is_built());
}
