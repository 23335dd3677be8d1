//! Lifecycle of a forecasting model over episodic series

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use tracing::{debug, info};

use super::forecasters::{one_step_truth, Forecaster, ForecasterKind};
use crate::data::{stack_rows, Episode, SeriesFrame};
use crate::error::{DatamodelerError, Result};
use crate::preprocessing::StandardScaler;
use crate::training::estimator::parse_params;
use crate::training::{Metric, ModelRegistry, ModelState};

/// Options accepted by [`TimeSeriesModel::fit`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TsFitParams {
    /// Log the fitted smoothing weights or lag order
    pub verbose: bool,
}

impl TsFitParams {
    pub fn from_mapping(params: &Mapping) -> Result<Self> {
        parse_params("fit_params", params)
    }
}

/// Options accepted by [`TimeSeriesModel::predict`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForecastParams {
    /// Steps to forecast past the end of each episode
    pub n: usize,
}

impl Default for ForecastParams {
    fn default() -> Self {
        Self { n: 1 }
    }
}

impl ForecastParams {
    pub fn new(n: usize) -> Self {
        Self { n }
    }

    pub fn from_mapping(params: &Mapping) -> Result<Self> {
        parse_params("predict_params", params)
    }
}

/// Forecaster wrapper with optional target standardization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeSeriesModel {
    kind: Option<ForecasterKind>,
    scale_data: bool,
    build_params: Mapping,
    label_cols: Vec<String>,
    feature_cols: Vec<String>,
    state: ModelState<Forecaster>,
    scaler: Option<StandardScaler>,
}

impl TimeSeriesModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(&self) -> Option<ForecasterKind> {
        self.kind
    }

    pub fn state(&self) -> &ModelState<Forecaster> {
        &self.state
    }

    pub fn label_cols(&self) -> &[String] {
        &self.label_cols
    }

    pub fn feature_cols(&self) -> &[String] {
        &self.feature_cols
    }

    pub fn build_model(&mut self, model_type: &str, scale_data: bool, build_params: &Mapping) -> Result<()> {
        let kind = ModelRegistry::new().forecaster(model_type)?;
        let forecaster = kind.build(build_params)?;
        self.kind = Some(kind);
        self.scale_data = scale_data;
        self.build_params = build_params.clone();
        self.scaler = None;
        self.state = ModelState::Built(forecaster);
        info!(model = %kind, scale_data, "Time-series model built");
        Ok(())
    }

    pub fn fit(&mut self, train: &SeriesFrame, params: &TsFitParams) -> Result<()> {
        let mut forecaster = self.state.built()?.clone();

        let scaler = if self.scale_data {
            let mut scaler = StandardScaler::new();
            scaler.fit(&train.stacked_targets()?)?;
            Some(scaler)
        } else {
            None
        };

        let frame = scale_frame(train, scaler.as_ref())?;
        forecaster.fit(&frame)?;

        if params.verbose {
            match &forecaster {
                Forecaster::Ets(m) => info!(weights = ?m.weights(), "Fitted smoothing weights"),
                Forecaster::Varima(m) => info!(order = m.order(), "Fitted VAR"),
            }
        }
        debug!(episodes = train.len(), rows = train.n_rows(), "Time-series model fitted");

        self.label_cols = train.label_cols().to_vec();
        self.feature_cols = train.feature_cols().to_vec();
        self.scaler = scaler;
        self.state = ModelState::Fitted(forecaster);
        Ok(())
    }

    /// One `n x output_dim` forecast per episode of `history`, in original units
    pub fn predict(&self, history: &SeriesFrame, params: &ForecastParams) -> Result<Vec<Array2<f64>>> {
        let forecaster = self.state.fitted()?;
        history
            .episodes()
            .iter()
            .map(|episode| {
                let scaled = self.scale_episode(episode)?;
                let forecast = forecaster.forecast(&scaled, params.n)?;
                self.unscale(forecast)
            })
            .collect()
    }

    /// Score one-step-ahead predictions over every episode of `frame`
    pub fn evaluate(&self, frame: &SeriesFrame, metric: Metric) -> Result<f64> {
        let forecaster = self.state.fitted()?;

        let mut predictions = Vec::with_capacity(frame.len());
        let mut truths = Vec::with_capacity(frame.len());
        for episode in frame.episodes() {
            let (start, predicted) = forecaster.one_step(&self.scale_episode(episode)?)?;
            predictions.push(self.unscale(predicted)?);
            truths.push(one_step_truth(episode, start));
        }

        fn views(parts: &[Array2<f64>]) -> Vec<ArrayView2<'_, f64>> {
            parts.iter().map(|p| p.view()).collect()
        }
        let y_pred = stack_rows(&views(&predictions), frame.output_dim())?;
        let y_true = stack_rows(&views(&truths), frame.output_dim())?;
        if y_true.nrows() == 0 {
            return Err(DatamodelerError::ValidationError(
                "no episode is long enough for a one-step prediction".to_string(),
            ));
        }
        metric.score(&y_true, &y_pred)
    }

    fn scale_episode(&self, episode: &Episode) -> Result<Episode> {
        match &self.scaler {
            Some(scaler) => Ok(Episode {
                targets: scaler.transform(&episode.targets)?,
                covariates: episode.covariates.clone(),
            }),
            None => Ok(episode.clone()),
        }
    }

    fn unscale(&self, values: Array2<f64>) -> Result<Array2<f64>> {
        match &self.scaler {
            Some(scaler) if values.nrows() > 0 => scaler.inverse_transform(&values),
            _ => Ok(values),
        }
    }
}

fn scale_frame(frame: &SeriesFrame, scaler: Option<&StandardScaler>) -> Result<SeriesFrame> {
    let Some(scaler) = scaler else {
        return Ok(frame.clone());
    };
    let episodes = frame
        .episodes()
        .iter()
        .map(|e| {
            Ok(Episode {
                targets: scaler.transform(&e.targets)?,
                covariates: e.covariates.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    SeriesFrame::new(episodes, frame.label_cols().to_vec(), frame.feature_cols().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trending_frame(offset: f64) -> SeriesFrame {
        let episodes = (0..3)
            .map(|e| {
                let targets = Array2::from_shape_fn((12, 1), |(t, _)| offset + 10.0 * e as f64 + 3.0 * t as f64);
                Episode {
                    covariates: Array2::zeros((12, 0)),
                    targets,
                }
            })
            .collect();
        SeriesFrame::new(episodes, vec!["level".into()], Vec::new()).unwrap()
    }

    fn trend_params() -> Mapping {
        serde_yaml::from_str("trend: true").unwrap()
    }

    #[test]
    fn test_unbuilt_calls_fail() {
        let mut model = TimeSeriesModel::new();
        let frame = trending_frame(0.0);
        assert!(matches!(
            model.fit(&frame, &TsFitParams::default()),
            Err(DatamodelerError::ModelNotBuilt)
        ));
        assert!(matches!(
            model.predict(&frame, &ForecastParams::default()),
            Err(DatamodelerError::ModelNotBuilt)
        ));
        assert!(matches!(model.evaluate(&frame, Metric::Mse), Err(DatamodelerError::ModelNotBuilt)));
    }

    #[test]
    fn test_unknown_forecaster() {
        let mut model = TimeSeriesModel::new();
        assert!(matches!(
            model.build_model("nhits", false, &Mapping::new()),
            Err(DatamodelerError::UnknownModel { .. })
        ));
    }

    #[test]
    fn test_scaled_forecast_in_original_units() {
        let mut model = TimeSeriesModel::new();
        model.build_model("ETS", true, &trend_params()).unwrap();
        model.fit(&trending_frame(100.0), &TsFitParams { verbose: true }).unwrap();

        let history = trending_frame(500.0);
        let forecasts = model.predict(&history, &ForecastParams::new(2)).unwrap();
        assert_eq!(forecasts.len(), 3);
        for (e, forecast) in forecasts.iter().enumerate() {
            assert_eq!(forecast.dim(), (2, 1));
            let last = 500.0 + 10.0 * e as f64 + 33.0;
            assert!((forecast[[0, 0]] - (last + 3.0)).abs() < 1e-6);
            assert!((forecast[[1, 0]] - (last + 6.0)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_evaluate_one_step() {
        let mut model = TimeSeriesModel::new();
        model.build_model("varima", false, &Mapping::new()).unwrap();
        model.fit(&trending_frame(0.0), &TsFitParams::default()).unwrap();
        let r2 = model.evaluate(&trending_frame(0.0), Metric::R2).unwrap();
        assert!(r2 > 0.99);
    }

    #[test]
    fn test_params_from_mapping() {
        let predict: Mapping = serde_yaml::from_str("n: 4").unwrap();
        assert_eq!(ForecastParams::from_mapping(&predict).unwrap().n, 4);
        assert_eq!(ForecastParams::from_mapping(&Mapping::new()).unwrap().n, 1);

        let bad: Mapping = serde_yaml::from_str("epochs: 3").unwrap();
        assert!(TsFitParams::from_mapping(&bad).is_err());
    }
}
