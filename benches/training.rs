use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use datamodeler::training::{EstimatorKind, Model};
use ndarray::{Array2, Axis};
use rand::prelude::*;
use serde_yaml::Mapping;

fn create_regression_data(n_rows: usize, n_features: usize) -> (Array2<f64>, Array2<f64>) {
    let mut rng = StdRng::seed_from_u64(42);
    let x = Array2::from_shape_fn((n_rows, n_features), |_| rng.gen::<f64>() * 10.0);

    // Target as sum of features + noise
    let y = x
        .sum_axis(Axis(1))
        .mapv(|s| s + rng.gen::<f64>() * 0.1)
        .insert_axis(Axis(1));
    (x, y)
}

fn params(yaml: &str) -> Mapping {
    serde_yaml::from_str(yaml).unwrap()
}

fn bench_training(c: &mut Criterion) {
    let mut group = c.benchmark_group("training");
    group.sample_size(10); // Fewer samples for training benchmarks

    let models = [
        (EstimatorKind::Linear, params("{}")),
        (EstimatorKind::Ridge, params("alpha: 1.0")),
        (EstimatorKind::Lasso, params("alpha: 0.01")),
    ];

    for n_rows in [1000, 5000, 10000].iter() {
        let (x, y) = create_regression_data(*n_rows, 10);

        for (kind, build_params) in &models {
            group.bench_with_input(BenchmarkId::new(kind.name(), n_rows), &(&x, &y), |b, (x, y)| {
                b.iter(|| {
                    let mut model = Model::new(*kind);
                    model.build_model(build_params).unwrap();
                    model.fit(black_box(x), black_box(y), true).unwrap()
                })
            });
        }
    }

    group.finish();
}

fn bench_prediction(c: &mut Criterion) {
    let mut group = c.benchmark_group("prediction");

    // Train once
    let (x_train, y_train) = create_regression_data(5000, 10);
    let mut model = Model::new(EstimatorKind::Knn);
    model.build_model(&params("n_neighbors: 5")).unwrap();
    model.fit(&x_train, &y_train, true).unwrap();

    for n_rows in [100, 1000].iter() {
        let (x_test, _) = create_regression_data(*n_rows, 10);

        group.bench_with_input(BenchmarkId::new("knn_predict", n_rows), &x_test, |b, x| {
            b.iter(|| model.predict(black_box(x), true).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_training, bench_prediction);
criterion_main!(benches);
