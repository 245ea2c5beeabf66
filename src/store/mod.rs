/// Feature store access.
///
/// The store holds engineered feature rows keyed by `(location_id,
/// timestamp)`. It is the only state shared between the scheduled feature
/// run, the training run, and the dashboard, and it arbitrates its own write
/// consistency; this crate never caches rows between runs.
///
/// Backends:
/// - `memory`: process-local, for tests and dry runs.
/// - `file`: a JSON file under `data_dir`, for single-host deployments.
/// - `postgres`: `features.feature_rows`, the production backend.

pub mod file;
pub mod memory;
pub mod postgres;

pub use file::FileFeatureStore;
pub use memory::MemoryFeatureStore;
pub use postgres::PostgresFeatureStore;

use crate::config::{Config, StoreBackend};
use crate::model::{FeatureRow, PipelineError, TimeRange};

pub trait FeatureStore {
    /// Backend name for logs.
    fn backend(&self) -> &str;

    /// Idempotent upsert keyed by `(location_id, timestamp)`.
    /// Returns the number of rows written.
    fn write(&mut self, rows: &[FeatureRow]) -> Result<usize, PipelineError>;

    /// Rows for one location with `window.start <= timestamp < window.end`,
    /// ascending. A window with no rows yields an empty Vec.
    fn read(&mut self, location_id: &str, window: &TimeRange) -> Result<Vec<FeatureRow>, PipelineError>;

    /// Up to `limit` newest rows for one location, ascending.
    fn latest(&mut self, location_id: &str, limit: usize) -> Result<Vec<FeatureRow>, PipelineError>;
}

/// Open the backend named in config.
pub fn open_feature_store(config: &Config) -> Result<Box<dyn FeatureStore>, PipelineError> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Box::new(MemoryFeatureStore::new())),
        StoreBackend::File => Ok(Box::new(FileFeatureStore::open(config.store_path())?)),
        StoreBackend::Postgres => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                PipelineError::Config("store.backend = \"postgres\" requires DATABASE_URL".to_string())
            })?;
            Ok(Box::new(PostgresFeatureStore::connect(url)?))
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use crate::model::FeatureRow;

    pub fn hour(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    pub fn row(location_id: &str, h: i64, aqi: f64) -> FeatureRow {
        FeatureRow {
            location_id: location_id.to_string(),
            timestamp: hour(h),
            hour: (h % 24) as u32,
            day_of_week: 0,
            temperature_c: 20.0,
            relative_humidity_pct: 50.0,
            wind_speed_kmh: 5.0,
            wind_direction_deg: None,
            surface_pressure_hpa: None,
            pm2_5: aqi / 4.0,
            pm10: aqi / 2.0,
            ozone: None,
            nitrogen_dioxide: None,
            sulphur_dioxide: None,
            carbon_monoxide: None,
            aqi,
            pm_ratio: Some(0.5),
            pm2_5_lag_1h: None,
            pm2_5_lag_24h: None,
            aqi_lag_1h: None,
            pm2_5_rolling_3h: aqi / 4.0,
            pm2_5_rolling_24h: aqi / 4.0,
        }
    }
}
