/// Multi-day outlook from stored history.
///
/// Each variable is projected hour by hour as
/// `recent mean + hour-of-day offset + trend × hours ahead`, where the
/// offset is that hour's historical mean minus the mean over all hours and
/// the trend is a least-squares slope over the last week. The result is
/// deterministic and clipped to physical limits, then rolled up into one
/// entry per 24-hour block.

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::thresholds::{AqiCategory, categorize};
use crate::analysis::aqi::AQI_MAX;
use crate::analysis::stats::hourly_means;
use crate::model::FeatureRow;

pub const OUTLOOK_DAYS: usize = 3;

/// Hours of history behind the trend slope.
const TREND_HOURS: i64 = 24 * 7;
/// Hours of history behind the base level.
const BASE_HOURS: usize = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlookHour {
    pub timestamp: DateTime<Utc>,
    pub temperature_c: f64,
    pub relative_humidity_pct: f64,
    pub wind_speed_kmh: f64,
    pub aqi: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayOutlook {
    /// UTC date of the block's first hour.
    pub date: NaiveDate,
    pub temperature_min_c: f64,
    pub temperature_max_c: f64,
    pub mean_humidity_pct: f64,
    pub mean_wind_kmh: f64,
    pub mean_aqi: f64,
    pub category: AqiCategory,
}

/// One projected variable.
struct Projection {
    base: f64,
    slope: f64,
    offsets: Vec<f64>,
}

impl Projection {
    fn new(rows: &[FeatureRow], value: fn(&FeatureRow) -> f64) -> Option<Self> {
        let newest = rows.last()?.timestamp;

        let means = hourly_means(rows, value);
        let present: Vec<f64> = means.iter().flatten().copied().collect();
        if present.is_empty() {
            return None;
        }
        let overall = present.iter().sum::<f64>() / present.len() as f64;
        let offsets = means.iter().map(|m| m.map_or(0.0, |m| m - overall)).collect();

        let recent: Vec<(f64, f64)> = rows
            .iter()
            .filter(|r| (newest - r.timestamp).num_hours() < TREND_HOURS)
            .map(|r| ((r.timestamp - newest).num_hours() as f64, value(r)))
            .filter(|(_, v)| v.is_finite())
            .collect();
        let base_points = &recent[recent.len().saturating_sub(BASE_HOURS)..];
        if base_points.is_empty() {
            return None;
        }
        let base = base_points.iter().map(|(_, v)| v).sum::<f64>() / base_points.len() as f64;

        Some(Self {
            base,
            slope: slope(&recent),
            offsets,
        })
    }

    fn at(&self, hour_of_day: u32, hours_ahead: i64) -> f64 {
        self.base + self.offsets[hour_of_day as usize] + self.slope * hours_ahead as f64
    }
}

/// Least-squares slope of `(x, y)`; flat when x has no spread.
fn slope(points: &[(f64, f64)]) -> f64 {
    let n = points.len() as f64;
    if points.len() < 2 {
        return 0.0;
    }
    let mx = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let my = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|(x, _)| (x - mx).powi(2)).sum();
    if sxx == 0.0 {
        return 0.0;
    }
    points.iter().map(|(x, y)| (x - mx) * (y - my)).sum::<f64>() / sxx
}

/// Hourly projection for the `days × 24` hours after the newest row.
/// `None` without history to project from.
pub fn project_hours(rows: &[FeatureRow], days: usize) -> Option<Vec<OutlookHour>> {
    let newest = rows.last()?.timestamp;
    let temperature = Projection::new(rows, |r| r.temperature_c)?;
    let humidity = Projection::new(rows, |r| r.relative_humidity_pct)?;
    let wind = Projection::new(rows, |r| r.wind_speed_kmh)?;
    let aqi = Projection::new(rows, |r| r.aqi)?;

    // temperature stays within 5 °C of what the history has seen
    let (t_lo, t_hi) = rows
        .iter()
        .map(|r| r.temperature_c)
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));

    let hours = (days * 24) as i64;
    (1..=hours)
        .map(|ahead| {
            let timestamp = newest.checked_add_signed(Duration::hours(ahead))?;
            let h = timestamp.hour();
            Some(OutlookHour {
                timestamp,
                temperature_c: temperature.at(h, ahead).clamp(t_lo - 5.0, t_hi + 5.0),
                relative_humidity_pct: humidity.at(h, ahead).clamp(0.0, 100.0),
                wind_speed_kmh: wind.at(h, ahead).max(0.0),
                aqi: aqi.at(h, ahead).clamp(0.0, AQI_MAX),
            })
        })
        .collect()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

/// Daily roll-up of [`project_hours`].
pub fn daily_outlook(rows: &[FeatureRow], days: usize) -> Option<Vec<DayOutlook>> {
    let hours = project_hours(rows, days)?;
    let days = hours
        .chunks(24)
        .map(|block| {
            let mean_aqi = mean(block.iter().map(|h| h.aqi));
            DayOutlook {
                date: block[0].timestamp.date_naive(),
                temperature_min_c: block.iter().map(|h| h.temperature_c).fold(f64::INFINITY, f64::min),
                temperature_max_c: block.iter().map(|h| h.temperature_c).fold(f64::NEG_INFINITY, f64::max),
                mean_humidity_pct: mean(block.iter().map(|h| h.relative_humidity_pct)),
                mean_wind_kmh: mean(block.iter().map(|h| h.wind_speed_kmh)),
                mean_aqi,
                category: categorize(mean_aqi),
            }
        })
        .collect();
    Some(days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{hour, row};

    /// Days warm from 06:00 to 17:59 and cool otherwise; everything else flat.
    fn cyclic(days: i64) -> Vec<FeatureRow> {
        (0..days * 24)
            .map(|h| {
                let mut r = row("karachi", h, 80.0);
                r.temperature_c = if (6..18).contains(&(h % 24)) { 35.0 } else { 25.0 };
                r.relative_humidity_pct = 60.0;
                r.wind_speed_kmh = 10.0;
                r
            })
            .collect()
    }

    #[test]
    fn test_flat_history_projects_flat() {
        let rows = cyclic(3);
        let hours = project_hours(&rows, OUTLOOK_DAYS).unwrap();
        assert_eq!(hours.len(), 72);
        assert_eq!(hours[0].timestamp, hour(72));
        assert!(hours.iter().all(|h| (h.aqi - 80.0).abs() < 1e-9));
        assert!(hours.iter().all(|h| (h.relative_humidity_pct - 60.0).abs() < 1e-9));
    }

    #[test]
    fn test_daily_cycle_is_kept() {
        let rows = cyclic(3);
        let hours = project_hours(&rows, 1).unwrap();
        // base 30, offsets ±5, no trend across whole symmetric days
        let night = hours.iter().find(|h| h.timestamp.hour() == 2).unwrap();
        let midday = hours.iter().find(|h| h.timestamp.hour() == 12).unwrap();
        assert!((night.temperature_c - 25.0).abs() < 1e-6);
        assert!((midday.temperature_c - 35.0).abs() < 1e-6);
    }

    #[test]
    fn test_rising_trend_continues_within_limits() {
        let rows: Vec<FeatureRow> = (0..72).map(|h| row("karachi", h, 100.0 + 5.0 * h as f64)).collect();
        let hours = project_hours(&rows, OUTLOOK_DAYS).unwrap();
        assert!(hours[1].aqi >= hours[0].aqi);
        assert!(hours.iter().all(|h| h.aqi <= AQI_MAX));
        assert_eq!(hours.last().unwrap().aqi, AQI_MAX);
    }

    #[test]
    fn test_daily_rollup() {
        let rows = cyclic(3);
        let days = daily_outlook(&rows, OUTLOOK_DAYS).unwrap();
        assert_eq!(days.len(), 3);
        assert_eq!(days[0].date, hour(72).date_naive());
        assert!((days[0].temperature_min_c - 25.0).abs() < 1e-6);
        assert!((days[0].temperature_max_c - 35.0).abs() < 1e-6);
        assert!((days[1].mean_aqi - 80.0).abs() < 1e-9);
        assert_eq!(days[1].category, AqiCategory::Moderate);
    }

    #[test]
    fn test_no_history_no_outlook() {
        assert!(daily_outlook(&[], OUTLOOK_DAYS).is_none());
    }
}
