//! JSON-file feature store for single-host deployments.
//!
//! The whole table is loaded on open and rewritten on every write via a
//! temp file + rename, so a crash mid-write leaves the previous table
//! intact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::model::{FeatureRow, PipelineError, TimeRange};
use crate::store::{FeatureStore, MemoryFeatureStore};

pub struct FileFeatureStore {
    path: PathBuf,
    inner: MemoryFeatureStore,
}

fn unavailable(path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::StoreUnavailable(format!("{}: {}", path.display(), e))
}

impl FileFeatureStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let path = path.into();
        let inner = match fs::read_to_string(&path) {
            Ok(text) => {
                let rows: Vec<FeatureRow> = serde_json::from_str(&text).map_err(|e| {
                    PipelineError::Store(format!("corrupt feature file {}: {}", path.display(), e))
                })?;
                MemoryFeatureStore::from_rows(rows)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => MemoryFeatureStore::new(),
            Err(e) => return Err(unavailable(&path, e)),
        };
        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), PipelineError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|e| unavailable(dir, e))?;
            }
        }
        let body = serde_json::to_string(&self.inner.all_rows())
            .map_err(|e| PipelineError::Store(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(|e| unavailable(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| unavailable(&self.path, e))?;
        Ok(())
    }
}

impl FeatureStore for FileFeatureStore {
    fn backend(&self) -> &str {
        "file"
    }

    fn write(&mut self, rows: &[FeatureRow]) -> Result<usize, PipelineError> {
        let written = self.inner.write(rows)?;
        self.persist()?;
        Ok(written)
    }

    fn read(&mut self, location_id: &str, window: &TimeRange) -> Result<Vec<FeatureRow>, PipelineError> {
        self.inner.read(location_id, window)
    }

    fn latest(&mut self, location_id: &str, limit: usize) -> Result<Vec<FeatureRow>, PipelineError> {
        self.inner.latest(location_id, limit)
    }
}
