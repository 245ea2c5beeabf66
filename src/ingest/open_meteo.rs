/// Open-Meteo Data API Client
///
/// Retrieves hourly weather and air-quality data for a coordinate pair and
/// joins the two on their shared `time` axis. Weather comes from the
/// forecast API for recent ranges and the ERA5 archive API for older ones;
/// pollutants come from the CAMS air-quality API.
///
/// API Documentation: https://open-meteo.com/en/docs
/// Historical weather: https://open-meteo.com/en/docs/historical-weather-api
/// Air quality: https://open-meteo.com/en/docs/air-quality-api

use std::collections::BTreeMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::config::FetchConfig;
use crate::ingest::ObservationSource;
use crate::locations::Location;
use crate::logging::{self, DataSource};
use crate::model::{Observation, PipelineError, TimeRange};

/// Weather variables requested from the forecast/archive endpoints.
pub const WEATHER_VARIABLES: [&str; 5] = [
    "temperature_2m",
    "relative_humidity_2m",
    "surface_pressure",
    "wind_speed_10m",
    "wind_direction_10m",
];

/// Pollutant variables requested from the air-quality endpoint.
pub const AIR_QUALITY_VARIABLES: [&str; 6] = [
    "pm10",
    "pm2_5",
    "carbon_monoxide",
    "nitrogen_dioxide",
    "sulphur_dioxide",
    "ozone",
];

/// The archive lags real time by several days; anything newer must come
/// from the forecast endpoint.
pub const ARCHIVE_LAG_DAYS: i64 = 5;

// ============================================================================
// Open-Meteo API Response Structures
// ============================================================================

/// Top-level response shared by all three endpoints.
#[derive(Debug, Deserialize)]
pub struct OpenMeteoResponse {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub hourly: Option<HourlyBlock>,
}

/// Columnar hourly data: one `time` array plus one array per variable.
#[derive(Debug, Default, Deserialize)]
pub struct HourlyBlock {
    pub time: Vec<String>, // "2024-01-01T00:00", GMT
    #[serde(flatten)]
    pub series: BTreeMap<String, Vec<Option<f64>>>,
}

/// Error body returned with 4xx responses.
#[derive(Debug, Deserialize)]
pub struct OpenMeteoErrorBody {
    #[serde(default)]
    pub error: bool,
    pub reason: String,
}

// ============================================================================
// URL Construction
// ============================================================================

/// Which weather endpoint serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherEndpoint {
    Forecast,
    Archive,
}

impl WeatherEndpoint {
    /// Archive for ranges that end before the archive lag, forecast otherwise.
    pub fn for_range(range: &TimeRange, now: DateTime<Utc>) -> Self {
        if range.end <= now - Duration::days(ARCHIVE_LAG_DAYS) {
            WeatherEndpoint::Archive
        } else {
            WeatherEndpoint::Forecast
        }
    }
}

/// Inclusive first and last calendar day (UTC) touched by a half-open range.
pub fn date_span(range: &TimeRange) -> (NaiveDate, NaiveDate) {
    let last_instant = range.end - Duration::seconds(1);
    (range.start.date_naive(), last_instant.date_naive())
}

fn build_url(base: &str, path: &str, location: &Location, range: &TimeRange, variables: &[&str]) -> String {
    let (start_date, end_date) = date_span(range);
    format!(
        "{}{}?latitude={:.4}&longitude={:.4}&start_date={}&end_date={}&hourly={}&timezone=GMT",
        base.trim_end_matches('/'),
        path,
        location.latitude,
        location.longitude,
        start_date.format("%Y-%m-%d"),
        end_date.format("%Y-%m-%d"),
        variables.join(",")
    )
}

/// Build the weather request URL for `range`.
pub fn build_weather_url(
    config: &FetchConfig,
    endpoint: WeatherEndpoint,
    location: &Location,
    range: &TimeRange,
) -> String {
    match endpoint {
        WeatherEndpoint::Archive => {
            build_url(&config.archive_base_url, "/v1/archive", location, range, &WEATHER_VARIABLES)
        }
        WeatherEndpoint::Forecast => {
            build_url(&config.forecast_base_url, "/v1/forecast", location, range, &WEATHER_VARIABLES)
        }
    }
}

/// Build the air-quality request URL for `range`.
pub fn build_air_quality_url(config: &FetchConfig, location: &Location, range: &TimeRange) -> String {
    build_url(
        &config.air_quality_base_url,
        "/v1/air-quality",
        location,
        range,
        &AIR_QUALITY_VARIABLES,
    )
}

/// Splits a range into consecutive sub-ranges of at most `chunk_days`.
pub fn chunk_range(range: &TimeRange, chunk_days: i64) -> Vec<TimeRange> {
    let step = Duration::days(chunk_days.max(1));
    let mut chunks = Vec::new();
    let mut current = range.start;
    while current < range.end {
        let chunk_end = (current + step).min(range.end);
        chunks.push(TimeRange {
            start: current,
            end: chunk_end,
        });
        current = chunk_end;
    }
    chunks
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Parse a response body into its hourly block.
///
/// A response without an `hourly` key yields an empty block.
pub fn parse_response(body: &str) -> Result<HourlyBlock, PipelineError> {
    let response: OpenMeteoResponse =
        serde_json::from_str(body).map_err(|e| PipelineError::Parse(e.to_string()))?;
    Ok(response.hourly.unwrap_or_default())
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, PipelineError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
        .map_err(|e| PipelineError::Parse(format!("bad time '{}': {}", raw, e)))
}

fn assign(obs: &mut Observation, variable: &str, value: Option<f64>) {
    let slot = match variable {
        "temperature_2m" => &mut obs.temperature_c,
        "relative_humidity_2m" => &mut obs.relative_humidity_pct,
        "surface_pressure" => &mut obs.surface_pressure_hpa,
        "wind_speed_10m" => &mut obs.wind_speed_kmh,
        "wind_direction_10m" => &mut obs.wind_direction_deg,
        "pm10" => &mut obs.pm10,
        "pm2_5" => &mut obs.pm2_5,
        "carbon_monoxide" => &mut obs.carbon_monoxide,
        "nitrogen_dioxide" => &mut obs.nitrogen_dioxide,
        "sulphur_dioxide" => &mut obs.sulphur_dioxide,
        "ozone" => &mut obs.ozone,
        _ => return, // unrequested extras are ignored
    };
    *slot = value;
}

/// Outer-join hourly blocks on their time axis into observations.
///
/// Every series must be exactly as long as its block's `time` array.
pub fn merge_hourly(location_id: &str, blocks: &[&HourlyBlock]) -> Result<Vec<Observation>, PipelineError> {
    let mut by_time: BTreeMap<DateTime<Utc>, Observation> = BTreeMap::new();

    for block in blocks {
        for (variable, values) in &block.series {
            if values.len() != block.time.len() {
                return Err(PipelineError::Parse(format!(
                    "series '{}' has {} values for {} timestamps",
                    variable,
                    values.len(),
                    block.time.len()
                )));
            }
        }

        for (i, raw_time) in block.time.iter().enumerate() {
            let timestamp = parse_time(raw_time)?;
            let obs = by_time
                .entry(timestamp)
                .or_insert_with(|| Observation::empty(location_id, timestamp));
            for (variable, values) in &block.series {
                assign(obs, variable, values[i]);
            }
        }
    }

    Ok(by_time.into_values().collect())
}

// ============================================================================
// API Client Functions
// ============================================================================

/// GET a URL and return its hourly block.
///
/// Error for a non-2xx response. Server-side failures are `Network`, so
/// they retry like transport errors; 4xx carries the upstream reason.
pub fn status_error(status: u16, body: &str) -> PipelineError {
    let reason = serde_json::from_str::<OpenMeteoErrorBody>(body)
        .map(|b| b.reason)
        .unwrap_or_else(|_| format!("HTTP {}", status));
    if status >= 500 {
        PipelineError::Network(format!("HTTP {}: {}", status, reason))
    } else {
        PipelineError::Api { status, reason }
    }
}

/// Transport failures and 5xx → `Network`; other non-2xx → `Api`.
pub fn fetch_hourly(client: &reqwest::blocking::Client, url: &str) -> Result<HourlyBlock, PipelineError> {
    let response = client
        .get(url)
        .header("Accept", "application/json")
        .send()
        .map_err(|e| PipelineError::Network(e.to_string()))?;

    let status = response.status();
    let body = response
        .text()
        .map_err(|e| PipelineError::Network(e.to_string()))?;

    if !status.is_success() {
        return Err(status_error(status.as_u16(), &body));
    }

    parse_response(&body)
}

/// Fetch and merge weather + air quality for one chunk.
pub fn fetch_chunk(
    client: &reqwest::blocking::Client,
    config: &FetchConfig,
    location: &Location,
    chunk: &TimeRange,
    now: DateTime<Utc>,
) -> Result<Vec<Observation>, PipelineError> {
    let endpoint = WeatherEndpoint::for_range(chunk, now);
    let weather = fetch_hourly(client, &build_weather_url(config, endpoint, location, chunk))?;
    let air = fetch_hourly(client, &build_air_quality_url(config, location, chunk))?;

    if weather.time.is_empty() {
        logging::warn(
            DataSource::OpenMeteo,
            Some(&location.id),
            &format!("weather API returned no hourly data from {}", chunk.start.to_rfc3339()),
        );
    }
    if air.time.is_empty() {
        logging::warn(
            DataSource::OpenMeteo,
            Some(&location.id),
            &format!("air-quality API returned no hourly data from {}", chunk.start.to_rfc3339()),
        );
    }

    merge_hourly(&location.id, &[&weather, &air])
}

/// Blocking Open-Meteo observation source.
pub struct OpenMeteoClient {
    client: reqwest::blocking::Client,
    config: FetchConfig,
}

impl OpenMeteoClient {
    pub fn new(config: &FetchConfig) -> Result<Self, PipelineError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .user_agent(concat!("aqimon/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Network(e.to_string()))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    pub fn http(&self) -> &reqwest::blocking::Client {
        &self.client
    }
}

impl ObservationSource for OpenMeteoClient {
    fn name(&self) -> &str {
        "open-meteo"
    }

    fn fetch(&self, location: &Location, range: &TimeRange) -> Result<Vec<Observation>, PipelineError> {
        let now = Utc::now();
        let chunks = chunk_range(range, self.config.chunk_days);
        let mut observations = Vec::new();

        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 && self.config.request_delay_ms > 0 {
                std::thread::sleep(StdDuration::from_millis(self.config.request_delay_ms));
            }
            logging::debug(
                DataSource::OpenMeteo,
                Some(&location.id),
                &format!(
                    "fetching chunk {}/{}: {} → {}",
                    i + 1,
                    chunks.len(),
                    chunk.start.to_rfc3339(),
                    chunk.end.to_rfc3339()
                ),
            );
            let rows = fetch_chunk(&self.client, &self.config, location, chunk, now)?;
            observations.extend(rows.into_iter().filter(|o| chunk.contains(o.timestamp)));
        }

        logging::info(
            DataSource::OpenMeteo,
            Some(&location.id),
            &format!("fetched {} hourly rows in {} request chunk(s)", observations.len(), chunks.len()),
        );
        Ok(observations)
    }
}

// ============================================================================
// Tests
// ============================================================================
