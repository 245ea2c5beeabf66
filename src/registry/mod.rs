/// Model registry.
///
/// Stores trained model artifacts under a name with monotonically
/// increasing versions. Registration is additive: a new artifact always gets
/// `latest + 1` and an existing version is never overwritten. Predictions
/// always name the single version they were produced by.
///
/// Backends:
/// - `MemoryModelRegistry`: tests and dry runs.
/// - `FileModelRegistry`: `<dir>/<name>/v<N>.json`.

pub mod file;
pub mod memory;

pub use file::FileModelRegistry;
pub use memory::MemoryModelRegistry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::model::{PipelineError, TimeRange};
use crate::train::{TrainedModel, TrainingMetrics};

/// A trained model before the registry has assigned it a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewModel {
    pub name: String,
    pub description: String,
    pub location_id: String,
    pub trained_at: DateTime<Utc>,
    pub horizon_hours: i64,
    pub feature_names: Vec<String>,
    pub training_window: TimeRange,
    pub metrics: TrainingMetrics,
    pub model: TrainedModel,
}

/// A registered, versioned model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u32,
    #[serde(flatten)]
    pub spec: NewModel,
}

impl ModelArtifact {
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

pub trait ModelRegistry {
    /// Store `model` as the next version of its name.
    fn register(&mut self, model: NewModel) -> Result<ModelArtifact, PipelineError>;

    /// Highest registered version of `name`, if any.
    fn get_latest(&self, name: &str) -> Result<Option<ModelArtifact>, PipelineError>;

    /// All registered versions of `name`, ascending.
    fn versions(&self, name: &str) -> Result<Vec<u32>, PipelineError>;
}

/// The registry configured under `[registry]`.
pub fn open_model_registry(config: &Config) -> Box<dyn ModelRegistry> {
    Box::new(FileModelRegistry::new(config.registry_path()))
}

/// Model names become directory names; keep them to a safe alphabet.
pub fn validate_model_name(name: &str) -> Result<(), PipelineError> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(PipelineError::Registry(format!("invalid model name '{}'", name)))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};

    use super::NewModel;
    use crate::model::TimeRange;
    use crate::train::ridge::RidgeModel;
    use crate::train::{TrainedModel, TrainingMetrics};

    pub fn new_model(name: &str, mae: f64) -> NewModel {
        NewModel {
            name: name.to_string(),
            description: "test model".to_string(),
            location_id: "karachi".to_string(),
            trained_at: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            horizon_hours: 1,
            feature_names: vec!["aqi".to_string()],
            training_window: TimeRange::new(
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            )
            .unwrap(),
            metrics: TrainingMetrics {
                mae,
                rmse: mae * 1.2,
                r2: 0.8,
                baseline_mae: mae * 1.5,
                train_rows: 100,
                test_rows: 25,
            },
            model: TrainedModel::Ridge(RidgeModel {
                alpha: 1.0,
                intercept: 50.0,
                coefficients: vec![1.0],
                feature_means: vec![50.0],
                feature_stds: vec![10.0],
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_name_validation() {
        assert!(validate_model_name("aqi_ridge").is_ok());
        assert!(validate_model_name("pm25-rf-2").is_ok());
        assert!(validate_model_name("").is_err());
        assert!(validate_model_name("../etc").is_err());
        assert!(validate_model_name("a b").is_err());
    }
}
