//! Directory-backed model registry.
//!
//! Layout: `<root>/<model name>/v<version>.json`. Files are created with
//! create-new semantics, so two trainers racing for the same version fail
//! loudly instead of clobbering each other.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::model::PipelineError;
use crate::registry::{ModelArtifact, ModelRegistry, NewModel, validate_model_name};

pub struct FileModelRegistry {
    root: PathBuf,
}

fn registry_err(path: &Path, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Registry(format!("{}: {}", path.display(), e))
}

/// `v12.json` → 12
fn parse_version(file_name: &str) -> Option<u32> {
    file_name.strip_prefix('v')?.strip_suffix(".json")?.parse().ok()
}

impl FileModelRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn model_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn artifact_path(&self, name: &str, version: u32) -> PathBuf {
        self.model_dir(name).join(format!("v{}.json", version))
    }

    /// Load one specific version.
    pub fn get(&self, name: &str, version: u32) -> Result<Option<ModelArtifact>, PipelineError> {
        validate_model_name(name)?;
        let path = self.artifact_path(name, version);
        match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| registry_err(&path, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(registry_err(&path, e)),
        }
    }

    /// Writes `artifact` to its version file. Fails with `Registry` if that
    /// version already exists on disk.
    fn write_version(&self, artifact: &ModelArtifact) -> Result<(), PipelineError> {
        let path = self.artifact_path(artifact.name(), artifact.version);
        let body = serde_json::to_string_pretty(artifact).map_err(|e| registry_err(&path, e))?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    registry_err(&path, "version already registered; refusing to overwrite")
                } else {
                    registry_err(&path, e)
                }
            })?;
        file.write_all(body.as_bytes()).map_err(|e| registry_err(&path, e))?;
        file.sync_all().map_err(|e| registry_err(&path, e))
    }
}

impl ModelRegistry for FileModelRegistry {
    fn register(&mut self, model: NewModel) -> Result<ModelArtifact, PipelineError> {
        validate_model_name(&model.name)?;
        let dir = self.model_dir(&model.name);
        fs::create_dir_all(&dir).map_err(|e| registry_err(&dir, e))?;

        let version = self.versions(&model.name)?.last().map(|v| v + 1).unwrap_or(1);
        let artifact = ModelArtifact { version, spec: model };
        self.write_version(&artifact)?;
        Ok(artifact)
    }

    fn get_latest(&self, name: &str) -> Result<Option<ModelArtifact>, PipelineError> {
        match self.versions(name)?.last() {
            Some(&version) => self.get(name, version),
            None => Ok(None),
        }
    }

    fn versions(&self, name: &str) -> Result<Vec<u32>, PipelineError> {
        validate_model_name(name)?;
        let dir = self.model_dir(name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(registry_err(&dir, e)),
        };

        let mut versions: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| parse_version(&entry.file_name().to_string_lossy()))
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }
}
