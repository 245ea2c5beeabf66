/// Model training.
///
/// The trainer turns a window of feature rows into a registered model:
/// pair each row at `t` with the AQI at `t + horizon`, split the pairs
/// chronologically, fit the configured model kind on the head, score it
/// against the held-out tail, and compare with a persistence baseline
/// (tomorrow looks like today). Nothing reaches the registry unless every
/// step succeeds.
///
/// Submodules:
/// - `ridge`: standardised ridge regression (ndarray + linfa).
/// - `forest`: random forest regression (smartcore).
/// - `metrics`: MAE, RMSE, R².

pub mod forest;
pub mod metrics;
pub mod ridge;

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::features::{MODEL_FEATURES, model_inputs};
use crate::config::TrainingConfig;
use crate::logging::{self, DataSource};
use crate::model::{FeatureRow, PipelineError, TimeRange};
use crate::registry::NewModel;
use forest::ForestModel;
use ridge::RidgeModel;

/// The model families the trainer can fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Ridge,
    RandomForest,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Ridge => write!(f, "ridge regression"),
            ModelKind::RandomForest => write!(f, "random forest"),
        }
    }
}

/// A fitted model of any kind, as stored in an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainedModel {
    Ridge(RidgeModel),
    RandomForest(ForestModel),
}

impl TrainedModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            TrainedModel::Ridge(_) => ModelKind::Ridge,
            TrainedModel::RandomForest(_) => ModelKind::RandomForest,
        }
    }

    pub fn predict(&self, input: &[f64]) -> Result<f64, PipelineError> {
        match self {
            TrainedModel::Ridge(m) => m.predict(input),
            TrainedModel::RandomForest(m) => m.predict(input),
        }
    }

    pub fn predict_batch(&self, inputs: &[Vec<f64>]) -> Result<Vec<f64>, PipelineError> {
        match self {
            TrainedModel::Ridge(m) => inputs.iter().map(|x| m.predict(x)).collect(),
            TrainedModel::RandomForest(m) => m.predict_batch(inputs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
    /// MAE of predicting the current AQI unchanged.
    pub baseline_mae: f64,
    pub train_rows: usize,
    pub test_rows: usize,
}

/// Feature vectors paired with their future AQI, in time order.
#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    pub timestamps: Vec<DateTime<Utc>>,
    pub inputs: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    /// AQI at `t`, for the persistence baseline.
    pub current_aqi: Vec<f64>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Pairs rows with the AQI `horizon_hours` later. Rows whose target hour is
/// missing are skipped rather than interpolated.
pub fn build_training_set(rows: &[FeatureRow], horizon_hours: i64) -> TrainingSet {
    let aqi_at: HashMap<DateTime<Utc>, f64> = rows.iter().map(|r| (r.timestamp, r.aqi)).collect();
    let mut ordered: Vec<&FeatureRow> = rows.iter().collect();
    ordered.sort_by_key(|r| r.timestamp);

    let mut set = TrainingSet::default();
    for row in ordered {
        if let Some(&target) = aqi_at.get(&(row.timestamp + Duration::hours(horizon_hours))) {
            set.timestamps.push(row.timestamp);
            set.inputs.push(model_inputs(row));
            set.targets.push(target);
            set.current_aqi.push(row.aqi);
        }
    }
    set
}

/// Number of leading samples used for fitting; the rest are held out.
/// Both sides get at least one sample when `len >= 2`.
pub fn split_point(len: usize, test_fraction: f64) -> usize {
    if len < 2 {
        return len;
    }
    let test = ((len as f64) * test_fraction).round() as usize;
    len - test.clamp(1, len - 1)
}

/// The window of history a training run at `now` reads.
pub fn training_window(now: DateTime<Utc>, window_days: i64) -> Result<TimeRange, PipelineError> {
    let start = Duration::try_days(window_days)
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(|| PipelineError::Config(format!("training window of {} days is out of range", window_days)))?;
    TimeRange::new(start, now)
}

pub struct Trainer {
    config: TrainingConfig,
    kind: ModelKind,
    model_name: String,
}

impl Trainer {
    pub fn new(config: TrainingConfig, kind: ModelKind, model_name: &str) -> Self {
        Self {
            config,
            kind,
            model_name: model_name.to_string(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn window(&self, now: DateTime<Utc>) -> Result<TimeRange, PipelineError> {
        training_window(now, self.config.window_days)
    }

    fn fit(&self, inputs: &[Vec<f64>], targets: &[f64]) -> Result<TrainedModel, PipelineError> {
        Ok(match self.kind {
            ModelKind::Ridge => TrainedModel::Ridge(RidgeModel::fit(inputs, targets, self.config.ridge_alpha)?),
            ModelKind::RandomForest => {
                TrainedModel::RandomForest(ForestModel::fit(inputs, targets, self.config.forest)?)
            }
        })
    }

    fn describe(&self) -> String {
        match self.kind {
            ModelKind::Ridge => format!(
                "Ridge regression (alpha {}) forecasting AQI {}h ahead",
                self.config.ridge_alpha, self.config.horizon_hours
            ),
            ModelKind::RandomForest => format!(
                "Random forest ({} trees, depth {}) forecasting AQI {}h ahead",
                self.config.forest.n_trees, self.config.forest.max_depth, self.config.horizon_hours
            ),
        }
    }

    /// Fit and evaluate. Fails with `InsufficientData` when the window does
    /// not yield `min_rows` training pairs.
    pub fn train(
        &self,
        location_id: &str,
        rows: &[FeatureRow],
        window: &TimeRange,
        now: DateTime<Utc>,
    ) -> Result<NewModel, PipelineError> {
        if rows.iter().any(|r| r.location_id != location_id) {
            return Err(PipelineError::Validation(format!(
                "training rows must all belong to {}",
                location_id
            )));
        }

        let set = build_training_set(rows, self.config.horizon_hours);
        if set.len() < self.config.min_rows {
            return Err(PipelineError::InsufficientData {
                rows: set.len(),
                required: self.config.min_rows,
            });
        }

        let cut = split_point(set.len(), self.config.test_fraction);
        let model = self.fit(&set.inputs[..cut], &set.targets[..cut])?;

        let test_actual = &set.targets[cut..];
        let predicted = model.predict_batch(&set.inputs[cut..])?;

        let score = |v: Option<f64>| {
            v.ok_or_else(|| PipelineError::Validation("empty evaluation split".to_string()))
        };
        let metrics = TrainingMetrics {
            mae: score(metrics::mae(test_actual, &predicted))?,
            rmse: score(metrics::rmse(test_actual, &predicted))?,
            r2: score(metrics::r2(test_actual, &predicted))?,
            baseline_mae: score(metrics::mae(test_actual, &set.current_aqi[cut..]))?,
            train_rows: cut,
            test_rows: set.len() - cut,
        };

        logging::info(
            DataSource::Trainer,
            Some(location_id),
            &format!(
                "{} ({}) trained on {} pairs: MAE {:.2} (baseline {:.2}), RMSE {:.2}, R² {:.3}",
                self.model_name,
                self.kind,
                set.len(),
                metrics.mae,
                metrics.baseline_mae,
                metrics.rmse,
                metrics.r2
            ),
        );
        if metrics.mae > metrics.baseline_mae {
            logging::warn(
                DataSource::Trainer,
                Some(location_id),
                &format!("{} does not beat the persistence baseline on held-out data", self.model_name),
            );
        }

        Ok(NewModel {
            name: self.model_name.clone(),
            description: self.describe(),
            location_id: location_id.to_string(),
            trained_at: now,
            horizon_hours: self.config.horizon_hours,
            feature_names: MODEL_FEATURES.iter().map(|s| s.to_string()).collect(),
            training_window: *window,
            metrics,
            model,
        })
    }
}
