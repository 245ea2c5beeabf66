/// Read-only dashboard.
///
/// Builds a `DashboardView` from the feature store and model registry and
/// renders it as text. A refresh never fails: store or registry errors are
/// turned into notices, the view is flagged stale, and the last known-good
/// snapshot (written after every clean refresh) fills in what could not be
/// read. Nothing here writes to the store or the registry.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::staleness::{age_minutes, is_stale_at};
use crate::alert::thresholds::{AqiCategory, categorize};
use crate::analysis::outlook::{DayOutlook, OUTLOOK_DAYS, daily_outlook};
use crate::analysis::stats::{
    HourlyProfile, RowSummary, SummaryStats, WeatherInsights, hourly_profile, summarize_rows, weather_insights,
};
use crate::config::Config;
use crate::locations::Location;
use crate::logging::{self, DataSource};
use crate::model::{FeatureRow, PipelineError, Prediction};
use crate::predict::predict_with;
use crate::registry::ModelRegistry;
use crate::store::FeatureStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub aqi: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardView {
    pub location_id: String,
    pub location_name: String,
    pub generated_at: DateTime<Utc>,
    pub latest_timestamp: Option<DateTime<Utc>>,
    pub current_aqi: Option<f64>,
    pub category: Option<AqiCategory>,
    pub trend: Vec<TrendPoint>,
    pub prediction: Option<Prediction>,
    pub summary: Option<RowSummary>,
    pub profile: Option<HourlyProfile>,
    #[serde(default)]
    pub insights: Option<WeatherInsights>,
    /// Daily outlook for the days after the newest row.
    #[serde(default)]
    pub outlook: Vec<DayOutlook>,
    pub stale: bool,
    pub notices: Vec<String>,
}

impl DashboardView {
    fn empty(location: &Location, now: DateTime<Utc>) -> Self {
        Self {
            location_id: location.id.clone(),
            location_name: location.name.clone(),
            generated_at: now,
            latest_timestamp: None,
            current_aqi: None,
            category: None,
            trend: Vec::new(),
            prediction: None,
            summary: None,
            profile: None,
            insights: None,
            outlook: Vec::new(),
            stale: false,
            notices: Vec::new(),
        }
    }

    /// Fills the data sections from `rows` (ascending).
    fn with_rows(mut self, rows: &[FeatureRow]) -> Self {
        if let Some(newest) = rows.last() {
            self.latest_timestamp = Some(newest.timestamp);
            self.current_aqi = Some(newest.aqi);
            self.category = Some(categorize(newest.aqi));
        }
        self.trend = rows
            .iter()
            .map(|r| TrendPoint { timestamp: r.timestamp, aqi: r.aqi })
            .collect();
        self.summary = summarize_rows(rows);
        self.profile = (!rows.is_empty()).then(|| hourly_profile(rows));
        self.insights = weather_insights(rows);
        self.outlook = daily_outlook(rows, OUTLOOK_DAYS).unwrap_or_default();
        self
    }

    /// Carries the data sections of an older view, keeping this view's
    /// notices and generation time.
    fn with_fallback(mut self, snapshot: &DashboardView) -> Self {
        self.latest_timestamp = snapshot.latest_timestamp;
        self.current_aqi = snapshot.current_aqi;
        self.category = snapshot.category;
        self.trend = snapshot.trend.clone();
        self.summary = snapshot.summary.clone();
        self.profile = snapshot.profile.clone();
        self.insights = snapshot.insights.clone();
        self.outlook = snapshot.outlook.clone();
        if self.prediction.is_none() {
            self.prediction = snapshot.prediction.clone();
        }
        self
    }
}

pub struct Dashboard {
    location: Location,
    model_name: String,
    trend_hours: usize,
    stale_after_minutes: u64,
    snapshot_path: PathBuf,
}

impl Dashboard {
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        Ok(Self {
            location: config.resolve_location()?,
            model_name: config.registry.serving_model_name().to_string(),
            trend_hours: config.dashboard.trend_hours,
            stale_after_minutes: config.dashboard.stale_after_minutes,
            snapshot_path: config.snapshot_path(),
        })
    }

    /// Builds the current view. `store` is the result of opening the store,
    /// so a store that cannot even be opened still yields a view.
    pub fn refresh(
        &self,
        store: Result<&mut dyn FeatureStore, PipelineError>,
        registry: &dyn ModelRegistry,
        now: DateTime<Utc>,
    ) -> DashboardView {
        let loc = Some(self.location.id.as_str());
        let mut view = DashboardView::empty(&self.location, now);
        let mut degraded = false;

        let rows = match store.and_then(|s| s.latest(&self.location.id, self.trend_hours)) {
            Ok(rows) => Some(rows),
            Err(e) => {
                logging::log_failure(DataSource::Dashboard, loc, "read features", &e);
                view.notices.push(format!("feature store unavailable: {}", e));
                degraded = true;
                None
            }
        };

        match registry.get_latest(&self.model_name) {
            Ok(Some(artifact)) => {
                if let Some(newest) = rows.as_ref().and_then(|r| r.last()) {
                    match predict_with(&artifact, newest) {
                        Ok(p) => view.prediction = Some(p),
                        Err(e) => view.notices.push(format!("no prediction: {}", e)),
                    }
                }
            }
            Ok(None) => view
                .notices
                .push(format!("no model named {} has been registered yet", self.model_name)),
            Err(e) => {
                logging::log_failure(DataSource::Dashboard, loc, "read model", &e);
                view.notices.push(format!("model registry unavailable: {}", e));
                degraded = true;
            }
        }

        view = match &rows {
            Some(rows) => {
                if rows.is_empty() {
                    view.notices.push("no feature data stored yet".to_string());
                }
                view.with_rows(rows)
            }
            None => view,
        };

        if degraded {
            match load_snapshot(&self.snapshot_path) {
                Some(snapshot) => {
                    view.notices.push(format!(
                        "showing last known-good data from {}",
                        snapshot.generated_at.format("%Y-%m-%d %H:%M UTC")
                    ));
                    if rows.is_none() {
                        view = view.with_fallback(&snapshot);
                    } else if view.prediction.is_none() {
                        view.prediction = snapshot.prediction;
                    }
                }
                None => view.notices.push("no last known-good snapshot available".to_string()),
            }
            view.stale = true;
        }

        if let Some(latest) = view.latest_timestamp {
            if is_stale_at(latest, self.stale_after_minutes, now) {
                view.stale = true;
                view.notices.push(format!(
                    "newest data is {} minutes old",
                    age_minutes(latest, now)
                ));
            }
        }

        if !degraded && view.latest_timestamp.is_some() {
            if let Err(e) = save_snapshot(&self.snapshot_path, &view) {
                logging::warn(DataSource::Dashboard, loc, &format!("could not save snapshot: {}", e));
            }
        }

        view
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

pub fn save_snapshot(path: &Path, view: &DashboardView) -> Result<(), PipelineError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    let body = serde_json::to_string_pretty(view).map_err(|e| PipelineError::Parse(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Missing or unreadable snapshots are simply absent.
pub fn load_snapshot(path: &Path) -> Option<DashboardView> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

const SPARK: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// One block character per value, scaled between the min and max.
pub fn sparkline(values: &[f64]) -> String {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let (lo, hi) = finite
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    finite
        .iter()
        .map(|v| {
            if hi - lo < f64::EPSILON {
                SPARK[0]
            } else {
                let idx = ((v - lo) / (hi - lo) * (SPARK.len() - 1) as f64).round() as usize;
                SPARK[idx.min(SPARK.len() - 1)]
            }
        })
        .collect()
}

fn stats_line(label: &str, s: &SummaryStats) -> String {
    format!(
        "  {:<12} mean {:>7.1}  std {:>6.1}  min {:>7.1}  max {:>7.1}",
        label, s.mean, s.std, s.min, s.max
    )
}

pub fn render(view: &DashboardView) -> String {
    let mut out = Vec::new();
    out.push(format!("Air Quality: {} ({})", view.location_name, view.location_id));
    out.push(format!(
        "Generated {}{}",
        view.generated_at.format("%Y-%m-%d %H:%M UTC"),
        if view.stale { "  [STALE]" } else { "" }
    ));
    out.push(String::new());

    match (view.current_aqi, view.category, view.latest_timestamp) {
        (Some(aqi), Some(category), Some(at)) => {
            out.push(format!(
                "Current AQI: {:.0} ({}) as of {}",
                aqi,
                category,
                at.format("%Y-%m-%d %H:%M UTC")
            ));
            out.push(format!("  {}", category.advice()));
        }
        _ => out.push("Current AQI: no data".to_string()),
    }

    match &view.prediction {
        Some(p) => out.push(format!(
            "Forecast:    {:.0} ({}) for {} [{} v{}]",
            p.predicted_aqi,
            p.category,
            p.target_time.format("%Y-%m-%d %H:%M UTC"),
            p.model_name,
            p.model_version
        )),
        None => out.push("Forecast:    unavailable".to_string()),
    }

    if !view.trend.is_empty() {
        let values: Vec<f64> = view.trend.iter().map(|t| t.aqi).collect();
        out.push(format!("Trend ({}h):  {}", view.trend.len(), sparkline(&values)));
    }

    if let Some(summary) = &view.summary {
        out.push(String::new());
        out.push(format!("Summary over {} hours:", summary.aqi.count));
        out.push(stats_line("AQI", &summary.aqi));
        out.push(stats_line("PM2.5 µg/m³", &summary.pm2_5));
        out.push(stats_line("Temp °C", &summary.temperature_c));
        out.push(stats_line("Humidity %", &summary.relative_humidity_pct));
    }

    if let Some(profile) = &view.profile {
        if let (Some((best, best_aqi)), Some((worst, worst_aqi))) =
            (profile.cleanest_hour(), profile.worst_hour())
        {
            out.push(format!(
                "Cleanest hour {:02}:00 UTC (avg {:.0}), worst hour {:02}:00 UTC (avg {:.0})",
                best, best_aqi, worst, worst_aqi
            ));
        }
    }

    if let Some(insights) = &view.insights {
        out.push(String::new());
        out.push(format!(
            "Heat index {:.1} °C: {}",
            insights.heat_index_c, insights.heat_advice
        ));
        out.push(format!(
            "  hottest {:02}:00 ({:.1} °C), coolest {:02}:00 ({:.1} °C), windiest {:02}:00 ({:.1} km/h)",
            insights.hottest_hour.0,
            insights.hottest_hour.1,
            insights.coolest_hour.0,
            insights.coolest_hour.1,
            insights.windiest_hour.0,
            insights.windiest_hour.1
        ));
    }

    if !view.outlook.is_empty() {
        out.push(String::new());
        out.push(format!("{}-day outlook:", view.outlook.len()));
        for day in &view.outlook {
            out.push(format!(
                "  {}  AQI {:>4.0} ({})  {:.0}-{:.0} °C  humidity {:.0}%  wind {:.0} km/h",
                day.date.format("%a %Y-%m-%d"),
                day.mean_aqi,
                day.category,
                day.temperature_min_c,
                day.temperature_max_c,
                day.mean_humidity_pct,
                day.mean_wind_kmh
            ));
        }
    }

    if !view.notices.is_empty() {
        out.push(String::new());
        for notice in &view.notices {
            out.push(format!("! {}", notice));
        }
    }

    out.join("\n")
}
