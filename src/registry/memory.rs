//! In-process model registry.

use std::collections::BTreeMap;

use crate::model::PipelineError;
use crate::registry::{ModelArtifact, ModelRegistry, NewModel, validate_model_name};

#[derive(Debug, Default)]
pub struct MemoryModelRegistry {
    models: BTreeMap<String, Vec<ModelArtifact>>,
}

impl MemoryModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelRegistry for MemoryModelRegistry {
    fn register(&mut self, model: NewModel) -> Result<ModelArtifact, PipelineError> {
        validate_model_name(&model.name)?;
        let entries = self.models.entry(model.name.clone()).or_default();
        let version = entries.last().map(|a| a.version + 1).unwrap_or(1);
        let artifact = ModelArtifact { version, spec: model };
        entries.push(artifact.clone());
        Ok(artifact)
    }

    fn get_latest(&self, name: &str) -> Result<Option<ModelArtifact>, PipelineError> {
        Ok(self.models.get(name).and_then(|v| v.last()).cloned())
    }

    fn versions(&self, name: &str) -> Result<Vec<u32>, PipelineError> {
        Ok(self
            .models
            .get(name)
            .map(|v| v.iter().map(|a| a.version).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::new_model;

    #[test]
    fn test_versions_are_additive() {
        let mut registry = MemoryModelRegistry::new();
        assert_eq!(registry.register(new_model("aqi_ridge", 5.0)).unwrap().version, 1);
        assert_eq!(registry.register(new_model("aqi_ridge", 4.0)).unwrap().version, 2);
        assert_eq!(registry.register(new_model("other", 4.0)).unwrap().version, 1);
        assert_eq!(registry.versions("aqi_ridge").unwrap(), vec![1, 2]);

        let latest = registry.get_latest("aqi_ridge").unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.spec.metrics.mae, 4.0);
    }

    #[test]
    fn test_unknown_name_has_no_latest() {
        let registry = MemoryModelRegistry::new();
        assert!(registry.get_latest("nothing").unwrap().is_none());
        assert!(registry.versions("nothing").unwrap().is_empty());
    }
}
