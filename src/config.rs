/// Service configuration.
///
/// Loaded from a TOML file (default `./aqimon.toml`) with every section
/// optional, then overlaid with environment variables from `.env`.
/// Secrets (the postgres connection string) only ever come from the
/// environment.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::locations::{self, Location};
use crate::model::PipelineError;
use crate::registry::validate_model_name;
use crate::train::ModelKind;
use crate::train::forest::ForestParams;

/// Config file used when neither `--config` nor `AQIMON_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "./aqimon.toml";

/// Upper bounds that keep every derived time range representable.
pub const MAX_LOOKBACK_HOURS: i64 = 24 * 366;
pub const MAX_WINDOW_DAYS: i64 = 3660;
pub const MAX_HORIZON_HOURS: i64 = 24 * 7;
pub const MAX_CHUNK_DAYS: i64 = 366;
pub const MAX_RUN_MINUTES: u64 = 24 * 60 * 7;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory for the run lock, dashboard snapshot, and file backends.
    pub data_dir: PathBuf,
    pub location: LocationConfig,
    pub fetch: FetchConfig,
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub training: TrainingConfig,
    pub schedule: ScheduleConfig,
    pub dashboard: DashboardConfig,
    pub logging: LoggingConfig,
    /// Populated from `DATABASE_URL`, never from the file.
    #[serde(skip)]
    pub database_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            location: LocationConfig::default(),
            fetch: FetchConfig::default(),
            store: StoreConfig::default(),
            registry: RegistryConfig::default(),
            training: TrainingConfig::default(),
            schedule: ScheduleConfig::default(),
            dashboard: DashboardConfig::default(),
            logging: LoggingConfig::default(),
            database_url: None,
        }
    }
}

/// Either a registry id, or an id plus explicit coordinates.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub id: String,
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            id: locations::DEFAULT_LOCATION_ID.to_string(),
            name: None,
            latitude: None,
            longitude: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Hours back from now fetched by an incremental feature run.
    pub lookback_hours: i64,
    /// Days per upstream request when backfilling long ranges.
    pub chunk_days: i64,
    /// Pause between chunk requests to stay under the rate limit.
    pub request_delay_ms: u64,
    pub timeout_secs: u64,
    pub forecast_base_url: String,
    pub archive_base_url: String,
    pub air_quality_base_url: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 72,
            chunk_days: 31,
            request_delay_ms: 2000,
            timeout_secs: 60,
            forecast_base_url: "https://api.open-meteo.com".to_string(),
            archive_base_url: "https://archive-api.open-meteo.com".to_string(),
            air_quality_base_url: "https://air-quality-api.open-meteo.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// JSON file used by the `file` backend. Relative to `data_dir`.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: PathBuf::from("features.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory holding `<model>/v<N>.json`. Relative to `data_dir`.
    pub path: PathBuf,
    /// Registry name of the ridge model.
    pub model_name: String,
    /// Registry name of the random forest model.
    pub forest_model_name: String,
    /// Which model kind `predict` and the dashboard use.
    pub serving: ModelKind,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models"),
            model_name: "aqi_ridge".to_string(),
            forest_model_name: "aqi_random_forest".to_string(),
            serving: ModelKind::Ridge,
        }
    }
}

impl RegistryConfig {
    pub fn name_for(&self, kind: ModelKind) -> &str {
        match kind {
            ModelKind::Ridge => &self.model_name,
            ModelKind::RandomForest => &self.forest_model_name,
        }
    }

    pub fn serving_model_name(&self) -> &str {
        self.name_for(self.serving)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Model kinds fitted by every training run, in registration order.
    pub models: Vec<ModelKind>,
    pub window_days: i64,
    pub min_rows: usize,
    pub horizon_hours: i64,
    pub ridge_alpha: f64,
    pub test_fraction: f64,
    pub forest: ForestParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            models: vec![ModelKind::Ridge, ModelKind::RandomForest],
            window_days: 90,
            min_rows: 48,
            horizon_hours: 1,
            ridge_alpha: 1.0,
            test_fraction: 0.2,
            forest: ForestParams::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// When the feature pipeline runs (5- or 6-field cron, UTC).
    pub cron: String,
    /// When the training pipeline runs.
    pub training_cron: String,
    /// Retries after the first attempt for retryable failures.
    pub retry_count: u32,
    pub retry_backoff_secs: u64,
    /// A run lock older than this is considered abandoned.
    pub max_run_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: "5 * * * *".to_string(),
            training_cron: "30 3 * * *".to_string(),
            retry_count: 3,
            retry_backoff_secs: 5,
            max_run_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub trend_hours: usize,
    pub stale_after_minutes: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            trend_hours: 72,
            stale_after_minutes: 180,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            timestamps: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        let config: Config =
            toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `.env`, then the config file. A missing file at the default
    /// path yields the defaults; a missing explicit path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        dotenv::dotenv().ok();

        let env_path = std::env::var("AQIMON_CONFIG").ok().map(PathBuf::from);
        let explicit = path.map(Path::to_path_buf).or(env_path);

        let mut config = match &explicit {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    PipelineError::Config(format!("cannot read {}: {}", p.display(), e))
                })?;
                Self::from_toml_str(&text)?
            }
            None => match std::fs::read_to_string(DEFAULT_CONFIG_PATH) {
                Ok(text) => Self::from_toml_str(&text)?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
                Err(e) => return Err(PipelineError::Config(e.to_string())),
            },
        };

        config.database_url = std::env::var("DATABASE_URL").ok();
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::Config(msg));

        if self.location.id.trim().is_empty() {
            return invalid("location.id must not be empty".to_string());
        }
        self.resolve_location()?;
        if !(1..=MAX_CHUNK_DAYS).contains(&self.fetch.chunk_days) {
            return invalid(format!(
                "fetch.chunk_days must be in 1..={}, got {}",
                MAX_CHUNK_DAYS, self.fetch.chunk_days
            ));
        }
        if !(1..=MAX_LOOKBACK_HOURS).contains(&self.fetch.lookback_hours) {
            return invalid(format!(
                "fetch.lookback_hours must be in 1..={}, got {}",
                MAX_LOOKBACK_HOURS, self.fetch.lookback_hours
            ));
        }
        if !(1..=MAX_WINDOW_DAYS).contains(&self.training.window_days) {
            return invalid(format!(
                "training.window_days must be in 1..={}, got {}",
                MAX_WINDOW_DAYS, self.training.window_days
            ));
        }
        if self.training.min_rows < 2 {
            return invalid(format!("training.min_rows must be >= 2, got {}", self.training.min_rows));
        }
        if !(self.training.test_fraction > 0.0 && self.training.test_fraction < 1.0) {
            return invalid(format!(
                "training.test_fraction must be in (0, 1), got {}",
                self.training.test_fraction
            ));
        }
        if !(1..=MAX_HORIZON_HOURS).contains(&self.training.horizon_hours) {
            return invalid(format!("training.horizon_hours must be in 1..={}", MAX_HORIZON_HOURS));
        }
        if !(self.training.ridge_alpha >= 0.0) {
            return invalid("training.ridge_alpha must be >= 0".to_string());
        }
        if self.training.models.is_empty() {
            return invalid("training.models must name at least one model".to_string());
        }
        for (i, kind) in self.training.models.iter().enumerate() {
            if self.training.models[..i].contains(kind) {
                return invalid(format!("training.models lists {} twice", kind));
            }
        }
        if !self.training.models.contains(&self.registry.serving) {
            return invalid(format!(
                "registry.serving is {} but training.models does not train it",
                self.registry.serving
            ));
        }
        if self.training.forest.n_trees == 0 || self.training.forest.max_depth == 0 {
            return invalid("training.forest needs n_trees >= 1 and max_depth >= 1".to_string());
        }
        validate_model_name(&self.registry.model_name).map_err(|e| PipelineError::Config(e.to_string()))?;
        validate_model_name(&self.registry.forest_model_name)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        if self.registry.model_name == self.registry.forest_model_name {
            return invalid("registry.model_name and registry.forest_model_name must differ".to_string());
        }
        if !(1..=MAX_RUN_MINUTES).contains(&self.schedule.max_run_minutes) {
            return invalid(format!(
                "schedule.max_run_minutes must be in 1..={}, got {}",
                MAX_RUN_MINUTES, self.schedule.max_run_minutes
            ));
        }
        if self.schedule.retry_count > 10 {
            return invalid(format!(
                "schedule.retry_count must be <= 10, got {}",
                self.schedule.retry_count
            ));
        }
        crate::schedule::parse_cron(&self.schedule.cron)
            .map_err(|e| PipelineError::Config(format!("schedule.cron: {}", e)))?;
        crate::schedule::parse_cron(&self.schedule.training_cron)
            .map_err(|e| PipelineError::Config(format!("schedule.training_cron: {}", e)))?;
        Ok(())
    }

    /// Resolves `[location]` against the registry.
    ///
    /// Explicit coordinates win; otherwise the id must be registered.
    pub fn resolve_location(&self) -> Result<Location, PipelineError> {
        let cfg = &self.location;
        match (cfg.latitude, cfg.longitude) {
            (Some(latitude), Some(longitude)) => {
                if !locations::coordinates_are_valid(latitude, longitude) {
                    return Err(PipelineError::Config(format!(
                        "location coordinates out of range: {}, {}",
                        latitude, longitude
                    )));
                }
                Ok(Location {
                    id: cfg.id.clone(),
                    name: cfg.name.clone().unwrap_or_else(|| cfg.id.clone()),
                    latitude,
                    longitude,
                })
            }
            (None, None) => locations::find_location(&cfg.id)
                .map(|known| {
                    let mut location = known.to_location();
                    if let Some(name) = &cfg.name {
                        location.name = name.clone();
                    }
                    location
                })
                .ok_or_else(|| {
                    PipelineError::Config(format!(
                        "unknown location '{}' and no coordinates given (known: {})",
                        cfg.id,
                        locations::all_location_ids().join(", ")
                    ))
                }),
            _ => Err(PipelineError::Config(
                "location.latitude and location.longitude must be set together".to_string(),
            )),
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(&self.store.path)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join(&self.registry.path)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("aqimon.lock")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("dashboard_snapshot.json")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
