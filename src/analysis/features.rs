//! Feature builder: raw observations → engineered hourly feature rows.
//!
//! Pure and deterministic. The same observation set always yields the same
//! rows, regardless of input order, except that when two observations fall
//! in the same hour the first one in input order is kept.
//!
//! Rows missing a required measurement are dropped and reported, never
//! imputed. No gap filling: an hour absent from the input is absent from
//! the output and shows up in `BuildReport::gaps`.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::ops::Bound::{Excluded, Included};

use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};

use crate::analysis::aqi::compute_aqi;
use crate::logging::{self, DataSource};
use crate::model::{FeatureRow, Observation, PipelineError};

/// Measurements a row cannot be used without.
pub const REQUIRED_FIELDS: [&str; 5] = [
    "pm2_5",
    "pm10",
    "temperature_c",
    "relative_humidity_pct",
    "wind_speed_kmh",
];

/// Inputs fed to the regression model, in order.
pub const MODEL_FEATURES: [&str; 11] = [
    "temperature_c",
    "relative_humidity_pct",
    "wind_speed_kmh",
    "pm2_5",
    "pm10",
    "aqi",
    "pm2_5_lag_1h",
    "pm2_5_rolling_3h",
    "pm2_5_rolling_24h",
    "hour_sin",
    "hour_cos",
];

const SHORT_WINDOW_HOURS: i64 = 3;
const LONG_WINDOW_HOURS: i64 = 24;

/// History a row needs before its own hour for complete lags and rolling
/// means. A feature run fetches this much extra and writes only its range.
pub const CONTEXT_HOURS: i64 = LONG_WINDOW_HOURS;

/// An observation rejected by validation.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedRow {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// A run of missing hours, `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Gap {
    pub fn missing_hours(&self) -> i64 {
        (self.to - self.from).num_hours()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuildReport {
    pub rows: Vec<FeatureRow>,
    pub dropped: Vec<DroppedRow>,
    pub gaps: Vec<Gap>,
}

/// Required measurements of a validated observation.
#[derive(Debug, Clone)]
struct Valid<'a> {
    obs: &'a Observation,
    pm2_5: f64,
    pm10: f64,
    temperature_c: f64,
    relative_humidity_pct: f64,
    wind_speed_kmh: f64,
}

fn require(value: Option<f64>, name: &str) -> Result<f64, PipelineError> {
    match value {
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(PipelineError::Validation(format!("{} is not finite ({})", name, v))),
        None => Err(PipelineError::Validation(format!("missing {}", name))),
    }
}

fn non_negative(value: f64, name: &str) -> Result<f64, PipelineError> {
    if value < 0.0 {
        Err(PipelineError::Validation(format!("{} is negative ({})", name, value)))
    } else {
        Ok(value)
    }
}

fn validate(obs: &Observation) -> Result<Valid<'_>, PipelineError> {
    let pm2_5 = non_negative(require(obs.pm2_5, "pm2_5")?, "pm2_5")?;
    let pm10 = non_negative(require(obs.pm10, "pm10")?, "pm10")?;
    let temperature_c = require(obs.temperature_c, "temperature_c")?;
    let relative_humidity_pct = require(obs.relative_humidity_pct, "relative_humidity_pct")?;
    if !(0.0..=100.0).contains(&relative_humidity_pct) {
        return Err(PipelineError::Validation(format!(
            "relative_humidity_pct out of range ({})",
            relative_humidity_pct
        )));
    }
    let wind_speed_kmh = non_negative(require(obs.wind_speed_kmh, "wind_speed_kmh")?, "wind_speed_kmh")?;
    Ok(Valid {
        obs,
        pm2_5,
        pm10,
        temperature_c,
        relative_humidity_pct,
        wind_speed_kmh,
    })
}

/// Checks a single observation, returning the first problem found.
pub fn validate_observation(obs: &Observation) -> Result<(), PipelineError> {
    validate(obs).map(|_| ())
}

/// Truncates a timestamp to the start of its hour.
pub fn align_to_hour(ts: DateTime<Utc>) -> Result<DateTime<Utc>, PipelineError> {
    ts.duration_trunc(Duration::hours(1))
        .map_err(|e| PipelineError::Validation(format!("cannot align {}: {}", ts, e)))
}

fn mean_in_window(
    by_hour: &BTreeMap<DateTime<Utc>, Valid<'_>>,
    t: DateTime<Utc>,
    window_hours: i64,
) -> f64 {
    let from = t - Duration::hours(window_hours);
    let (sum, n) = by_hour
        .range((Excluded(from), Included(t)))
        .fold((0.0, 0usize), |(sum, n), (_, v)| (sum + v.pm2_5, n + 1));
    // t itself is always in the map, so n >= 1
    sum / n.max(1) as f64
}

/// Builds the feature table for one location.
///
/// Fails with `Validation` only when the input spans several locations;
/// individual bad rows are dropped and listed in the report.
pub fn build_features(observations: &[Observation]) -> Result<BuildReport, PipelineError> {
    let mut report = BuildReport::default();
    let Some(first) = observations.first() else {
        return Ok(report);
    };
    let location_id = first.location_id.as_str();

    if let Some(other) = observations.iter().find(|o| o.location_id != location_id) {
        return Err(PipelineError::Validation(format!(
            "observations span multiple locations ('{}' and '{}')",
            location_id, other.location_id
        )));
    }

    let mut by_hour: BTreeMap<DateTime<Utc>, Valid<'_>> = BTreeMap::new();
    for obs in observations {
        let hour = align_to_hour(obs.timestamp)?;
        match validate(obs) {
            Ok(valid) => {
                by_hour.entry(hour).or_insert(valid);
            }
            Err(e) => {
                logging::warn(
                    DataSource::Features,
                    Some(location_id),
                    &format!("dropping row {}: {}", obs.timestamp.to_rfc3339(), e),
                );
                report.dropped.push(DroppedRow {
                    timestamp: obs.timestamp,
                    reason: e.to_string(),
                });
            }
        }
    }

    let mut previous: Option<DateTime<Utc>> = None;
    for (&t, v) in &by_hour {
        if let Some(prev) = previous {
            if t - prev > Duration::hours(1) {
                report.gaps.push(Gap {
                    from: prev + Duration::hours(1),
                    to: t,
                });
            }
        }
        previous = Some(t);

        let aqi = compute_aqi(v.pm2_5, v.pm10);
        let lag = |hours: i64| by_hour.get(&(t - Duration::hours(hours)));

        report.rows.push(FeatureRow {
            location_id: location_id.to_string(),
            timestamp: t,
            hour: t.hour(),
            day_of_week: t.weekday().num_days_from_monday(),
            temperature_c: v.temperature_c,
            relative_humidity_pct: v.relative_humidity_pct,
            wind_speed_kmh: v.wind_speed_kmh,
            wind_direction_deg: v.obs.wind_direction_deg,
            surface_pressure_hpa: v.obs.surface_pressure_hpa,
            pm2_5: v.pm2_5,
            pm10: v.pm10,
            ozone: v.obs.ozone,
            nitrogen_dioxide: v.obs.nitrogen_dioxide,
            sulphur_dioxide: v.obs.sulphur_dioxide,
            carbon_monoxide: v.obs.carbon_monoxide,
            aqi,
            pm_ratio: if v.pm10 > 0.0 { Some(v.pm2_5 / v.pm10) } else { None },
            pm2_5_lag_1h: lag(1).map(|p| p.pm2_5),
            pm2_5_lag_24h: lag(24).map(|p| p.pm2_5),
            aqi_lag_1h: lag(1).map(|p| compute_aqi(p.pm2_5, p.pm10)),
            pm2_5_rolling_3h: mean_in_window(&by_hour, t, SHORT_WINDOW_HOURS),
            pm2_5_rolling_24h: mean_in_window(&by_hour, t, LONG_WINDOW_HOURS),
        });
    }

    for gap in &report.gaps {
        logging::debug(
            DataSource::Features,
            Some(location_id),
            &format!("{} missing hour(s) from {}", gap.missing_hours(), gap.from.to_rfc3339()),
        );
    }

    Ok(report)
}

/// Model input vector for a row, ordered as `MODEL_FEATURES`.
///
/// A missing 1-hour lag falls back to the current value.
pub fn model_inputs(row: &FeatureRow) -> Vec<f64> {
    let angle = 2.0 * PI * row.hour as f64 / 24.0;
    vec![
        row.temperature_c,
        row.relative_humidity_pct,
        row.wind_speed_kmh,
        row.pm2_5,
        row.pm10,
        row.aqi,
        row.pm2_5_lag_1h.unwrap_or(row.pm2_5),
        row.pm2_5_rolling_3h,
        row.pm2_5_rolling_24h,
        angle.sin(),
        angle.cos(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obs_at(hour: u32, pm2_5: f64) -> Observation {
        let mut obs = Observation::empty("karachi", Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap());
        obs.pm2_5 = Some(pm2_5);
        obs.pm10 = Some(pm2_5 * 2.0);
        obs.temperature_c = Some(20.0);
        obs.relative_humidity_pct = Some(60.0);
        obs.wind_speed_kmh = Some(8.0);
        obs
    }

    fn full_day() -> Vec<Observation> {
        (0..24).map(|h| obs_at(h, 10.0 + h as f64)).collect()
    }

    #[test]
    fn test_24_hourly_observations_give_24_rows_without_gaps() {
        let report = build_features(&full_day()).unwrap();
        assert_eq!(report.rows.len(), 24);
        assert!(report.gaps.is_empty());
        assert!(report.dropped.is_empty());
        for pair in report.rows.windows(2) {
            assert_eq!(pair[1].timestamp - pair[0].timestamp, Duration::hours(1));
        }
    }

    #[test]
    fn test_building_twice_is_identical() {
        let obs = full_day();
        assert_eq!(build_features(&obs).unwrap(), build_features(&obs).unwrap());
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let forward = full_day();
        let mut reversed = full_day();
        reversed.reverse();
        assert_eq!(
            build_features(&forward).unwrap().rows,
            build_features(&reversed).unwrap().rows
        );
    }

    #[test]
    fn test_lags_and_rolling_means() {
        let report = build_features(&full_day()).unwrap();
        let first = &report.rows[0];
        assert_eq!(first.pm2_5_lag_1h, None);
        assert_eq!(first.pm2_5_rolling_3h, 10.0);

        let third = &report.rows[2];
        assert_eq!(third.pm2_5_lag_1h, Some(11.0));
        assert_eq!(third.pm2_5_rolling_3h, 11.0); // mean of 10, 11, 12
        assert_eq!(third.pm_ratio, Some(0.5));

        // no row is 24h after another in a single day
        assert!(report.rows.iter().all(|r| r.pm2_5_lag_24h.is_none()));
    }

    #[test]
    fn test_missing_required_field_drops_row() {
        let mut obs = full_day();
        obs[5].pm2_5 = None;
        obs[6].relative_humidity_pct = Some(140.0);
        let report = build_features(&obs).unwrap();
        assert_eq!(report.rows.len(), 22);
        assert_eq!(report.dropped.len(), 2);
        assert!(report.dropped[0].reason.contains("pm2_5"));
        assert_eq!(report.gaps.len(), 1);
        assert_eq!(report.gaps[0].missing_hours(), 2);
    }

    #[test]
    fn test_sub_hour_timestamps_are_aligned_and_deduplicated() {
        let mut a = obs_at(3, 10.0);
        a.timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 3, 20, 0).unwrap();
        let mut b = obs_at(3, 99.0);
        b.timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 3, 45, 0).unwrap();
        let report = build_features(&[a, b]).unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap());
        assert_eq!(report.rows[0].pm2_5, 10.0);
    }

    #[test]
    fn test_mixed_locations_is_a_validation_error() {
        let mut obs = full_day();
        obs[3].location_id = "lahore".to_string();
        assert!(matches!(build_features(&obs), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_zero_pm10_has_no_ratio() {
        let mut obs = obs_at(0, 0.0);
        obs.pm10 = Some(0.0);
        let report = build_features(&[obs]).unwrap();
        assert_eq!(report.rows[0].pm_ratio, None);
        assert_eq!(report.rows[0].aqi, 0.0);
    }

    #[test]
    fn test_empty_input_builds_empty_table() {
        let report = build_features(&[]).unwrap();
        assert!(report.rows.is_empty());
    }

    #[test]
    fn test_model_inputs_match_feature_names() {
        let report = build_features(&full_day()).unwrap();
        let inputs = model_inputs(&report.rows[6]);
        assert_eq!(inputs.len(), MODEL_FEATURES.len());
        // hour 6 → quarter turn
        assert!((inputs[9] - 1.0).abs() < 1e-12);
        assert!(inputs[10].abs() < 1e-12);
    }
}
