//! End-to-end runs through the trainer

use datamodeler::config::{ConfigLoader, RunConfig};
use datamodeler::error::DatamodelerError;
use datamodeler::trainer::{run, RunPaths};
use datamodeler::training::{Model, ModelFamily};
use std::fs;
use std::path::Path;

fn write(dir: &Path, rel: &str, text: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn regression_csv(rows: usize) -> String {
    let mut text = String::from("f1,f2,label\n");
    for i in 0..rows {
        let f1 = (i % 10) as f64;
        let f2 = (i / 10) as f64;
        text.push_str(&format!("{},{},{}\n", f1, f2, 3.0 * f1 + f2 - 2.0));
    }
    text
}

fn episodic_csv() -> String {
    let mut text = String::from("episode,iteration,level,drive\n");
    for ep in 0..6 {
        for it in 0..15 {
            let drive = ((it * 3 + ep) % 4) as f64;
            text.push_str(&format!("{},{},{},{}\n", ep, it, ep as f64 + 0.5 * it as f64, drive));
        }
    }
    text
}

const TABULAR: &str = r#"
data:
  path: data/regression.csv
  full_or_relative: relative
  inputs: [f1, f2]
  outputs:
    label: {}
  iteration_order: 0
  test_perc: 0.2
model:
  name: linear_model
  build_params: {}
  saver:
    filename: models/model.json
  sweep:
    run: false
    split_strategy: 5
    results_csv_path: null
"#;

#[test]
fn test_tabular_run_end_to_end() {
    let base = tempfile::tempdir().unwrap();
    write(base.path(), "data/regression.csv", &regression_csv(100));
    let run_dir = base.path().join("outputs").join("run");

    let config = RunConfig::from_yaml(TABULAR).unwrap();
    let report = run(&config, &RunPaths::new(base.path(), &run_dir)).unwrap();

    assert_eq!(report.family, ModelFamily::Regressor);
    assert_eq!(report.n_train, 80);
    assert_eq!(report.n_test, 20);
    assert_eq!(report.prediction_shape, (20, 1));
    assert!(report.r2.unwrap() > 0.999);
    assert!(report.trials.is_none());

    for split in ["x_train", "y_train", "x_test", "y_test"] {
        assert!(run_dir.join("data").join(format!("{}.npy", split)).exists());
        assert!(run_dir.join("data").join(format!("{}.csv", split)).exists());
    }
    let saved = base.path().join("models").join("model.json");
    let model = Model::load_model(&saved).unwrap();
    assert!(model.state().is_fitted());
    assert_eq!(model.input_dim(), 2);
}

#[test]
fn test_sweep_run_writes_trial_table() {
    let base = tempfile::tempdir().unwrap();
    write(base.path(), "data/regression.csv", &regression_csv(100));
    let run_dir = base.path().join("run");

    let yaml = TABULAR
        .replace("name: linear_model", "name: ridge")
        .replace("    run: false", "    run: true\n    num_trials: 0\n    params:\n      alpha: [0.001, 0.1, 10.0]")
        .replace("results_csv_path: null", "results_csv_path: sweep.csv");
    let config = RunConfig::from_yaml(&yaml).unwrap();
    let report = run(&config, &RunPaths::new(base.path(), &run_dir)).unwrap();

    assert_eq!(report.trials, Some(3));
    assert!(run_dir.join("sweep.csv").exists());
}

#[test]
fn test_time_series_run() {
    let base = tempfile::tempdir().unwrap();
    write(base.path(), "data/series.csv", &episodic_csv());

    let yaml = r#"
data:
  path: data/series.csv
  full_or_relative: relative
  outputs: [level]
  augmented_cols: [drive]
  episode_col: episode
  iteration_col: iteration
  test_perc: 0.34
model:
  name: varima
  predict_params:
    n: 3
  saver:
    filename: models/ts.json
  sweep:
    run: true
    split_strategy: 3
    results_csv_path: null
"#;
    let config = RunConfig::from_yaml(yaml).unwrap();
    let run_dir = base.path().join("run");
    let report = run(&config, &RunPaths::new(base.path(), &run_dir)).unwrap();

    assert_eq!(report.family, ModelFamily::TimeSeries);
    assert!(report.r2.is_none());
    // floor(0.66 * 6) = 3 training episodes, 3 forecast episodes of 3 steps
    assert_eq!(report.n_train, 45);
    assert_eq!(report.prediction_shape, (9, 1));
    // the time-series path persists nothing
    assert!(!run_dir.join("data").exists());
    assert!(!base.path().join("models").exists());
}

#[test]
fn test_composed_config_with_overrides() {
    let base = tempfile::tempdir().unwrap();
    write(base.path(), "data/regression.csv", &regression_csv(50));
    write(
        base.path(),
        "conf/config.yaml",
        "defaults:\n  - data: regression\n  - model: linear\n  - _self_\n",
    );
    write(
        base.path(),
        "conf/data/regression.yaml",
        "path: data/regression.csv\nfull_or_relative: relative\ninputs: [f1, f2]\noutputs: [label]\niteration_order: 0\n",
    );
    write(
        base.path(),
        "conf/model/linear.yaml",
        "name: linear_model\nsaver:\n  filename: linear.json\nsweep:\n  run: false\n  split_strategy: 3\n  results_csv_path: null\n",
    );
    write(
        base.path(),
        "conf/model/knn.yaml",
        "name: knn\nbuild_params:\n  n_neighbors: 3\nsaver:\n  filename: knn.json\nsweep:\n  run: false\n  split_strategy: 3\n  results_csv_path: null\n",
    );

    let loader = ConfigLoader::new(base.path().join("conf"), "config");
    let overrides = vec!["model=knn".to_string(), "data.test_perc=0.5".to_string()];
    assert!(loader.load(&overrides).is_err(), "test_perc is not in the data group");

    let overrides = vec!["model=knn".to_string(), "+data.test_perc=0.5".to_string()];
    let (config, _) = loader.load(&overrides).unwrap();
    assert_eq!(config.model.name, "knn");

    let report = run(&config, &RunPaths::new(base.path(), base.path().join("run"))).unwrap();
    assert_eq!(report.n_test, 25);
    assert!(base.path().join("knn.json").exists());
}

#[test]
fn test_missing_required_key() {
    let yaml = TABULAR.replace("  saver:\n    filename: models/model.json\n", "");
    match RunConfig::from_yaml(&yaml) {
        Err(DatamodelerError::ConfigError(msg)) => assert!(msg.contains("model.saver.filename")),
        other => panic!("expected a config error, got {:?}", other.map(|_| ())),
    }
}
