//! Datamodeler - Main Entry Point
//!
//! Composes the run configuration, prepares the run directory and trains.

use anyhow::Context;
use clap::Parser;
use datamodeler::config::ConfigLoader;
use datamodeler::trainer::{self, RunPaths};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Train a regression model from a composed YAML configuration
#[derive(Parser, Debug)]
#[command(name = "datamodeler", version, about)]
struct Cli {
    /// Directory holding the primary config and its groups
    #[arg(long, default_value = "conf")]
    config_path: PathBuf,

    /// Primary config file name, without `.yaml`
    #[arg(long, default_value = "config")]
    config_name: String,

    /// Output directory for this run [default: outputs/<date>/<time>]
    #[arg(long)]
    run_dir: Option<PathBuf>,

    /// Overrides: `a.b=value`, `group=option` or `+a.b=value`
    overrides: Vec<String>,
}

fn default_run_dir() -> PathBuf {
    let now = chrono::Local::now();
    Path::new("outputs")
        .join(now.format("%Y-%m-%d").to_string())
        .join(now.format("%H-%M-%S").to_string())
}

fn base_dir(config_path: &Path) -> anyhow::Result<PathBuf> {
    let config_dir = fs::canonicalize(config_path)
        .with_context(|| format!("config directory {} not found", config_path.display()))?;
    Ok(config_dir.parent().map(Path::to_path_buf).unwrap_or(config_dir))
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "datamodeler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let loader = ConfigLoader::new(&cli.config_path, &cli.config_name);
    let (config, composed) = loader.load(&cli.overrides)?;

    let run_dir = cli.run_dir.unwrap_or_else(default_run_dir);
    fs::create_dir_all(&run_dir).with_context(|| format!("cannot create run directory {}", run_dir.display()))?;
    fs::write(run_dir.join("config.yaml"), serde_yaml::to_string(&composed)?)?;

    let paths = RunPaths::new(base_dir(&cli.config_path)?, &run_dir);
    info!(run_dir = %run_dir.display(), base_dir = %paths.base_dir.display(), "Starting run");

    let report = trainer::run(&config, &paths)?;
    match report.r2 {
        Some(r2) => info!(family = %report.family, r2, shape = ?report.prediction_shape, "Run finished"),
        None => info!(family = %report.family, shape = ?report.prediction_shape, "Run finished"),
    }
    Ok(())
}
