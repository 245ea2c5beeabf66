/// Applies the latest registered model to the newest feature row.
///
/// Predictions are transient. They are returned to the caller (CLI or
/// dashboard) and never written back to the store.

use chrono::Duration;

use crate::alert::thresholds::categorize;
use crate::analysis::aqi::AQI_MAX;
use crate::analysis::features::{MODEL_FEATURES, model_inputs};
use crate::logging::{self, DataSource};
use crate::model::{FeatureRow, PipelineError, Prediction};
use crate::registry::{ModelArtifact, ModelRegistry};
use crate::store::FeatureStore;

/// Predict with a specific artifact.
pub fn predict_with(artifact: &ModelArtifact, row: &FeatureRow) -> Result<Prediction, PipelineError> {
    let spec = &artifact.spec;
    if spec.feature_names.iter().map(String::as_str).ne(MODEL_FEATURES.iter().copied()) {
        return Err(PipelineError::Registry(format!(
            "{} v{} was trained on a different feature set",
            spec.name, artifact.version
        )));
    }
    if spec.location_id != row.location_id {
        return Err(PipelineError::Registry(format!(
            "{} v{} was trained for {}, not {}",
            spec.name, artifact.version, spec.location_id, row.location_id
        )));
    }

    let raw = spec.model.predict(&model_inputs(row))?;
    let predicted_aqi = if raw.is_finite() { raw.clamp(0.0, AQI_MAX) } else { 0.0 };

    Ok(Prediction {
        location_id: row.location_id.clone(),
        based_on: row.timestamp,
        target_time: row.timestamp + Duration::hours(spec.horizon_hours),
        predicted_aqi,
        category: categorize(predicted_aqi).label().to_string(),
        model_name: spec.name.clone(),
        model_version: artifact.version,
    })
}

/// Newest row for `location_id` run through the latest `model_name`.
pub fn predict_latest(
    store: &mut dyn FeatureStore,
    registry: &dyn ModelRegistry,
    location_id: &str,
    model_name: &str,
) -> Result<Prediction, PipelineError> {
    let row = store
        .latest(location_id, 1)?
        .pop()
        .ok_or(PipelineError::InsufficientData { rows: 0, required: 1 })?;
    let artifact = registry
        .get_latest(model_name)?
        .ok_or_else(|| PipelineError::Registry(format!("no registered model named {}", model_name)))?;

    let prediction = predict_with(&artifact, &row)?;
    logging::info(
        DataSource::Registry,
        Some(location_id),
        &format!(
            "{} v{} predicts AQI {:.0} ({}) for {}",
            prediction.model_name,
            prediction.model_version,
            prediction.predicted_aqi,
            prediction.category,
            prediction.target_time.format("%Y-%m-%d %H:%M UTC")
        ),
    );
    Ok(prediction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::new_model;
    use crate::registry::{MemoryModelRegistry, NewModel};
    use crate::store::MemoryFeatureStore;
    use crate::store::test_support::{hour, row};
    use crate::train::TrainedModel;
    use crate::train::ridge::RidgeModel;

    /// Predicts `intercept + slope * aqi`.
    fn aqi_model(intercept: f64, slope: f64) -> NewModel {
        let width = MODEL_FEATURES.len();
        let aqi_idx = MODEL_FEATURES.iter().position(|f| *f == "aqi").unwrap();
        let mut coefficients = vec![0.0; width];
        coefficients[aqi_idx] = slope;
        let mut model = new_model("aqi_ridge", 5.0);
        model.feature_names = MODEL_FEATURES.iter().map(|s| s.to_string()).collect();
        model.model = TrainedModel::Ridge(RidgeModel {
            alpha: 1.0,
            intercept,
            coefficients,
            feature_means: vec![0.0; width],
            feature_stds: vec![1.0; width],
        });
        model
    }

    #[test]
    fn test_predict_latest_uses_newest_row_and_version() {
        let mut store = MemoryFeatureStore::new();
        store.write(&[row("karachi", 0, 40.0), row("karachi", 5, 120.0)]).unwrap();
        let mut registry = MemoryModelRegistry::new();
        registry.register(aqi_model(0.0, 0.5)).unwrap();
        registry.register(aqi_model(10.0, 1.0)).unwrap();

        let p = predict_latest(&mut store, &registry, "karachi", "aqi_ridge").unwrap();
        assert_eq!(p.based_on, hour(5));
        assert_eq!(p.target_time, hour(6));
        assert_eq!(p.predicted_aqi, 130.0);
        assert_eq!(p.category, "Unhealthy for Sensitive Groups");
        assert_eq!(p.model_version, 2);
    }

    #[test]
    fn test_prediction_is_clamped() {
        let mut registry = MemoryModelRegistry::new();
        let high = registry.register(aqi_model(900.0, 1.0)).unwrap();
        let low = registry.register(aqi_model(-900.0, 1.0)).unwrap();
        let r = row("karachi", 0, 50.0);
        assert_eq!(predict_with(&high, &r).unwrap().predicted_aqi, 500.0);
        assert_eq!(predict_with(&low, &r).unwrap().predicted_aqi, 0.0);
    }

    #[test]
    fn test_missing_inputs_are_errors() {
        let mut store = MemoryFeatureStore::new();
        let registry = MemoryModelRegistry::new();
        assert!(matches!(
            predict_latest(&mut store, &registry, "karachi", "aqi_ridge"),
            Err(PipelineError::InsufficientData { rows: 0, .. })
        ));
        store.write(&[row("karachi", 0, 40.0)]).unwrap();
        assert!(matches!(
            predict_latest(&mut store, &registry, "karachi", "aqi_ridge"),
            Err(PipelineError::Registry(_))
        ));
    }

    #[test]
    fn test_mismatched_artifact_is_rejected() {
        let mut registry = MemoryModelRegistry::new();
        let stale_features = registry.register(new_model("aqi_ridge", 5.0)).unwrap();
        assert!(predict_with(&stale_features, &row("karachi", 0, 40.0)).is_err());

        let good = registry.register(aqi_model(0.0, 1.0)).unwrap();
        assert!(predict_with(&good, &row("lahore", 0, 40.0)).is_err());
    }
}
