/// Core data types for the air quality monitoring service.
///
/// This module defines the shared domain model imported by all other modules:
/// raw observations, engineered feature rows, time windows, predictions, and
/// the error taxonomy every pipeline stage reports through.
/// It contains no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Time windows
// ---------------------------------------------------------------------------

/// Half-open UTC time range: `start <= t < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Builds a range, rejecting empty or inverted windows.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, PipelineError> {
        if start >= end {
            return Err(PipelineError::Validation(format!(
                "time range start {} is not before end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }

    pub fn hours(&self) -> i64 {
        (self.end - self.start).num_hours()
    }
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// A single hourly weather + pollutant record for one location.
///
/// Corresponds to one index of the `hourly` arrays returned by the Open-Meteo
/// weather and air-quality endpoints, joined on the `time` axis. Any variable
/// may be missing (`None`) when the upstream model has no value for that hour;
/// the feature builder decides which gaps are fatal for a row.
///
/// Observations are append-only and keyed by `(location_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub location_id: String,
    pub timestamp: DateTime<Utc>,
    pub temperature_c: Option<f64>,
    pub relative_humidity_pct: Option<f64>,
    pub surface_pressure_hpa: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    pub pm10: Option<f64>,            // µg/m³
    pub pm2_5: Option<f64>,           // µg/m³
    pub carbon_monoxide: Option<f64>, // µg/m³
    pub nitrogen_dioxide: Option<f64>,
    pub sulphur_dioxide: Option<f64>,
    pub ozone: Option<f64>,
}

impl Observation {
    /// An observation with every measurement unset.
    pub fn empty(location_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            location_id: location_id.to_string(),
            timestamp,
            temperature_c: None,
            relative_humidity_pct: None,
            surface_pressure_hpa: None,
            wind_speed_kmh: None,
            wind_direction_deg: None,
            pm10: None,
            pm2_5: None,
            carbon_monoxide: None,
            nitrogen_dioxide: None,
            sulphur_dioxide: None,
            ozone: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Feature row
// ---------------------------------------------------------------------------

/// One hour of engineered features, keyed by `(location_id, timestamp)`.
///
/// Produced by `analysis::features::build_features`. Lag columns are `None`
/// when the referenced hour is not present in the build input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub location_id: String,
    pub timestamp: DateTime<Utc>,
    pub hour: u32,
    pub day_of_week: u32, // 0 = Monday
    pub temperature_c: f64,
    pub relative_humidity_pct: f64,
    pub wind_speed_kmh: f64,
    pub wind_direction_deg: Option<f64>,
    pub surface_pressure_hpa: Option<f64>,
    pub pm2_5: f64,
    pub pm10: f64,
    pub ozone: Option<f64>,
    pub nitrogen_dioxide: Option<f64>,
    pub sulphur_dioxide: Option<f64>,
    pub carbon_monoxide: Option<f64>,
    pub aqi: f64,
    pub pm_ratio: Option<f64>,
    pub pm2_5_lag_1h: Option<f64>,
    pub pm2_5_lag_24h: Option<f64>,
    pub aqi_lag_1h: Option<f64>,
    pub pm2_5_rolling_3h: f64,
    pub pm2_5_rolling_24h: f64,
}

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

/// A forecast AQI value produced by exactly one registered model version.
///
/// Transient: shown by the dashboard, never written back to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub location_id: String,
    /// Timestamp of the feature row the model was applied to.
    pub based_on: DateTime<Utc>,
    /// Hour the predicted AQI applies to.
    pub target_time: DateTime<Utc>,
    pub predicted_aqi: f64,
    pub category: String,
    pub model_name: String,
    pub model_version: u32,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise anywhere in the fetch → build → store → train chain.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Upstream API unreachable, timed out, or returned a 5xx.
    #[error("Network error: {0}")]
    Network(String),
    /// Upstream API rejected the request (4xx with a reason body).
    #[error("API error {status}: {reason}")]
    Api { status: u16, reason: String },
    /// The response body could not be deserialized.
    #[error("Parse error: {0}")]
    Parse(String),
    /// The upstream returned no rows for the requested range.
    #[error("No data for {location} between {start} and {end}")]
    DataGap {
        location: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// A record or request failed validation.
    #[error("Validation error: {0}")]
    Validation(String),
    /// The feature store could not be reached.
    #[error("Feature store unavailable: {0}")]
    StoreUnavailable(String),
    /// The feature store was reachable but rejected the operation.
    #[error("Feature store error: {0}")]
    Store(String),
    /// Too few rows in the training window.
    #[error("Insufficient data: {rows} training rows, need at least {required}")]
    InsufficientData { rows: usize, required: usize },
    #[error("Model registry error: {0}")]
    Registry(String),
    #[error("Configuration error: {0}")]
    Config(String),
    /// Another pipeline run holds the run lock.
    #[error("Run already in progress (lock held at {0})")]
    RunInProgress(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether the scheduler should retry the failed step with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Network(_) | PipelineError::StoreUnavailable(_) => true,
            PipelineError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
