/// Summary statistics over feature rows, for the dashboard.
///
/// Pure functions: NaN inputs are skipped, empty inputs yield `None`.

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::model::FeatureRow;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

pub fn summarize(values: &[f64]) -> Option<SummaryStats> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }

    let count = finite.len();
    let mean = finite.iter().sum::<f64>() / count as f64;
    let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Some(SummaryStats { count, mean, std: variance.sqrt(), min, max })
}

/// Per-column stats for a row set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowSummary {
    pub aqi: SummaryStats,
    pub pm2_5: SummaryStats,
    pub temperature_c: SummaryStats,
    pub relative_humidity_pct: SummaryStats,
}

pub fn summarize_rows(rows: &[FeatureRow]) -> Option<RowSummary> {
    let column = |f: fn(&FeatureRow) -> f64| rows.iter().map(f).collect::<Vec<_>>();
    Some(RowSummary {
        aqi: summarize(&column(|r| r.aqi))?,
        pm2_5: summarize(&column(|r| r.pm2_5))?,
        temperature_c: summarize(&column(|r| r.temperature_c))?,
        relative_humidity_pct: summarize(&column(|r| r.relative_humidity_pct))?,
    })
}

/// Mean of `value` per UTC hour of day. Hours with no finite values are
/// `None`.
pub fn hourly_means(rows: &[FeatureRow], value: impl Fn(&FeatureRow) -> f64) -> Vec<Option<f64>> {
    let mut sums = [0.0f64; 24];
    let mut counts = [0usize; 24];
    for row in rows {
        let v = value(row);
        if v.is_finite() {
            let h = row.timestamp.hour() as usize;
            sums[h] += v;
            counts[h] += 1;
        }
    }
    (0..24)
        .map(|h| (counts[h] > 0).then(|| sums[h] / counts[h] as f64))
        .collect()
}

fn present(means: &[Option<f64>]) -> impl Iterator<Item = (u32, f64)> + '_ {
    means
        .iter()
        .enumerate()
        .filter_map(|(h, v)| v.map(|v| (h as u32, v)))
}

fn lowest(means: &[Option<f64>]) -> Option<(u32, f64)> {
    present(means).min_by(|a, b| a.1.total_cmp(&b.1))
}

fn highest(means: &[Option<f64>]) -> Option<(u32, f64)> {
    present(means).max_by(|a, b| a.1.total_cmp(&b.1))
}

/// Mean AQI per UTC hour of day. Hours with no rows are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyProfile {
    pub mean_aqi: Vec<Option<f64>>,
}

impl HourlyProfile {
    /// Hour with the lowest mean AQI.
    pub fn cleanest_hour(&self) -> Option<(u32, f64)> {
        lowest(&self.mean_aqi)
    }

    /// Hour with the highest mean AQI.
    pub fn worst_hour(&self) -> Option<(u32, f64)> {
        highest(&self.mean_aqi)
    }
}

pub fn hourly_profile(rows: &[FeatureRow]) -> HourlyProfile {
    HourlyProfile {
        mean_aqi: hourly_means(rows, |r| r.aqi),
    }
}

/// Apparent temperature from the last day's mean temperature and humidity:
/// each 10 points of humidity above 50% add half a degree.
pub fn heat_index(temperature_c: f64, relative_humidity_pct: f64) -> f64 {
    temperature_c + 0.5 * (relative_humidity_pct - 50.0) / 10.0
}

pub fn heat_advice(heat_index_c: f64) -> &'static str {
    if heat_index_c > 35.0 {
        "Stay indoors: high heat risk"
    } else if heat_index_c > 30.0 {
        "Early morning walks recommended"
    } else {
        "Comfortable for outdoor activities"
    }
}

/// Weather highlights for the dashboard's insights panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherInsights {
    pub heat_index_c: f64,
    pub heat_advice: String,
    /// `(hour, mean °C)` of the warmest hour of day.
    pub hottest_hour: (u32, f64),
    pub coolest_hour: (u32, f64),
    /// `(hour, mean km/h)` of the windiest hour of day.
    pub windiest_hour: (u32, f64),
}

/// Hours of the most recent day used for the heat index.
const HEAT_INDEX_HOURS: usize = 24;

/// Insights over `rows` (ascending). `None` when there are no rows.
pub fn weather_insights(rows: &[FeatureRow]) -> Option<WeatherInsights> {
    let recent = &rows[rows.len().saturating_sub(HEAT_INDEX_HOURS)..];
    let temp = summarize(&recent.iter().map(|r| r.temperature_c).collect::<Vec<_>>())?;
    let humidity = summarize(&recent.iter().map(|r| r.relative_humidity_pct).collect::<Vec<_>>())?;
    let index = heat_index(temp.mean, humidity.mean);

    let temperature = hourly_means(rows, |r| r.temperature_c);
    let wind = hourly_means(rows, |r| r.wind_speed_kmh);
    Some(WeatherInsights {
        heat_index_c: index,
        heat_advice: heat_advice(index).to_string(),
        hottest_hour: highest(&temperature)?,
        coolest_hour: lowest(&temperature)?,
        windiest_hour: highest(&wind)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::row;

    #[test]
    fn test_summarize_basic() {
        let s = summarize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(s.count, 8);
        assert_eq!(s.mean, 5.0);
        assert_eq!(s.std, 2.0);
        assert_eq!(s.min, 2.0);
        assert_eq!(s.max, 9.0);
    }

    #[test]
    fn test_summarize_skips_nan_and_handles_empty() {
        assert!(summarize(&[]).is_none());
        assert!(summarize(&[f64::NAN]).is_none());
        let s = summarize(&[f64::NAN, 10.0]).unwrap();
        assert_eq!(s.count, 1);
        assert_eq!(s.std, 0.0);
    }

    #[test]
    fn test_hourly_profile_finds_extremes() {
        let rows = vec![
            row("karachi", 3, 40.0),
            row("karachi", 27, 60.0), // hour 3 next day
            row("karachi", 8, 150.0),
            row("karachi", 14, 20.0),
        ];
        let profile = hourly_profile(&rows);
        assert_eq!(profile.mean_aqi.len(), 24);
        assert_eq!(profile.mean_aqi[3], Some(50.0));
        assert_eq!(profile.mean_aqi[0], None);
        assert_eq!(profile.cleanest_hour(), Some((14, 20.0)));
        assert_eq!(profile.worst_hour(), Some((8, 150.0)));
    }

    #[test]
    fn test_empty_profile_has_no_extremes() {
        let profile = hourly_profile(&[]);
        assert!(profile.cleanest_hour().is_none());
        assert!(profile.worst_hour().is_none());
        assert!(summarize_rows(&[]).is_none());
    }

    #[test]
    fn test_heat_index_and_advice() {
        assert_eq!(heat_index(30.0, 50.0), 30.0);
        assert_eq!(heat_index(34.0, 90.0), 36.0);
        assert_eq!(heat_advice(36.0), "Stay indoors: high heat risk");
        assert_eq!(heat_advice(31.0), "Early morning walks recommended");
        assert_eq!(heat_advice(30.0), "Comfortable for outdoor activities");
    }

    #[test]
    fn test_weather_insights_find_hour_extremes() {
        let rows: Vec<FeatureRow> = (0..48)
            .map(|h| {
                let mut r = row("karachi", h, 50.0);
                let hour = (h % 24) as f64;
                r.temperature_c = 20.0 + hour; // warmest at 23:00
                r.wind_speed_kmh = if h % 24 == 15 { 30.0 } else { 5.0 };
                r.relative_humidity_pct = 70.0;
                r
            })
            .collect();
        let insights = weather_insights(&rows).unwrap();
        assert_eq!(insights.hottest_hour, (23, 43.0));
        assert_eq!(insights.coolest_hour, (0, 20.0));
        assert_eq!(insights.windiest_hour, (15, 30.0));
        // last 24 rows: mean temp 31.5, humidity 70 → +1
        assert_eq!(insights.heat_index_c, 32.5);
        assert_eq!(insights.heat_advice, "Early morning walks recommended");
        assert!(weather_insights(&[]).is_none());
    }

    #[test]
    fn test_summarize_rows_columns() {
        let rows = vec![row("karachi", 0, 40.0), row("karachi", 1, 80.0)];
        let summary = summarize_rows(&rows).unwrap();
        assert_eq!(summary.aqi.mean, 60.0);
        assert_eq!(summary.pm2_5.max, 20.0);
        assert_eq!(summary.temperature_c.std, 0.0);
        assert_eq!(summary.relative_humidity_pct.count, 2);
    }
}
