//! Upstream Verification Module
//!
//! Checks, against the live services, that the configured location can be
//! served end to end: both Open-Meteo endpoints answer with the hourly
//! series the feature builder needs, and the configured feature store
//! accepts a read.
//!
//! Run this after changing the location or store configuration.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::ingest::open_meteo::{
    AIR_QUALITY_VARIABLES, HourlyBlock, OpenMeteoClient, WEATHER_VARIABLES, WeatherEndpoint,
    build_air_quality_url, build_weather_url, fetch_hourly,
};
use crate::model::{PipelineError, TimeRange};
use crate::store::FeatureStore;

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub location_id: String,
    pub endpoints: Vec<EndpointVerification>,
    pub store: StoreVerification,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub working: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointVerification {
    pub name: String,
    pub url: String,
    pub status: VerificationStatus,
    pub hours_returned: usize,
    pub series_available: Vec<String>,
    pub series_missing: Vec<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreVerification {
    pub backend: String,
    pub status: VerificationStatus,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VerificationStatus {
    Success,
    PartialSuccess,
    Failed,
}

impl VerificationStatus {
    pub fn is_working(&self) -> bool {
        !matches!(self, VerificationStatus::Failed)
    }
}

// ============================================================================
// Endpoint Verification
// ============================================================================

/// Fills availability fields from a parsed block. A series counts as
/// available when it carries at least one non-null value.
pub fn assess_block(result: &mut EndpointVerification, block: &HourlyBlock, expected: &[&str]) {
    result.hours_returned = block.time.len();
    for name in expected {
        let has_values = block
            .series
            .get(*name)
            .is_some_and(|values| values.iter().any(Option::is_some));
        if has_values {
            result.series_available.push(name.to_string());
        } else {
            result.series_missing.push(name.to_string());
        }
    }

    result.status = if result.hours_returned == 0 || result.series_available.is_empty() {
        VerificationStatus::Failed
    } else if result.series_missing.is_empty() {
        VerificationStatus::Success
    } else {
        VerificationStatus::PartialSuccess
    };
    if result.hours_returned == 0 {
        result.error_message = Some("no hourly data returned".to_string());
    }
}

pub fn verify_endpoint(
    client: &reqwest::blocking::Client,
    name: &str,
    url: &str,
    expected: &[&str],
) -> EndpointVerification {
    let mut result = EndpointVerification {
        name: name.to_string(),
        url: url.to_string(),
        status: VerificationStatus::Failed,
        hours_returned: 0,
        series_available: Vec::new(),
        series_missing: Vec::new(),
        error_message: None,
    };

    match fetch_hourly(client, url) {
        Ok(block) => assess_block(&mut result, &block, expected),
        Err(e) => result.error_message = Some(format!("API request failed: {}", e)),
    }

    result
}

// ============================================================================
// Store Verification
// ============================================================================

/// Reads a window that holds no rows yet; success means the store answered.
pub fn verify_store(
    store: Result<&mut dyn FeatureStore, PipelineError>,
    location_id: &str,
    now: DateTime<Utc>,
) -> StoreVerification {
    let window = TimeRange {
        start: now + Duration::days(365),
        end: now + Duration::days(365) + Duration::hours(1),
    };

    match store {
        Ok(store) => {
            let backend = store.backend().to_string();
            match store.read(location_id, &window) {
                Ok(_) => StoreVerification {
                    backend,
                    status: VerificationStatus::Success,
                    error_message: None,
                },
                Err(e) => StoreVerification {
                    backend,
                    status: VerificationStatus::Failed,
                    error_message: Some(e.to_string()),
                },
            }
        }
        Err(e) => StoreVerification {
            backend: "unopened".to_string(),
            status: VerificationStatus::Failed,
            error_message: Some(e.to_string()),
        },
    }
}

// ============================================================================
// Full Verification Runner
// ============================================================================

fn status_marker(status: &VerificationStatus) -> &'static str {
    match status {
        VerificationStatus::Success => "OK",
        VerificationStatus::PartialSuccess => "PARTIAL",
        VerificationStatus::Failed => "FAILED",
    }
}

pub fn run_full_verification(
    config: &Config,
    store: Result<&mut dyn FeatureStore, PipelineError>,
) -> Result<VerificationReport, PipelineError> {
    let now = Utc::now();
    let location = config.resolve_location()?;
    let client = OpenMeteoClient::new(&config.fetch)?;

    let end = now
        .duration_trunc(Duration::hours(1))
        .map_err(|e| PipelineError::Validation(e.to_string()))?;
    let range = TimeRange::new(end - Duration::hours(24), end)?;

    println!("Verifying Open-Meteo endpoints for {} ...", location.id);
    let checks = [
        (
            "weather (forecast)",
            build_weather_url(&config.fetch, WeatherEndpoint::Forecast, &location, &range),
            &WEATHER_VARIABLES[..],
        ),
        (
            "air quality",
            build_air_quality_url(&config.fetch, &location, &range),
            &AIR_QUALITY_VARIABLES[..],
        ),
    ];

    let mut endpoints = Vec::new();
    for (name, url, expected) in checks {
        print!("  {} ... ", name);
        let result = verify_endpoint(client.http(), name, &url, expected);
        match result.status {
            VerificationStatus::Success => println!("OK ({} hours)", result.hours_returned),
            VerificationStatus::PartialSuccess => {
                println!("PARTIAL (missing: {:?})", result.series_missing)
            }
            VerificationStatus::Failed => println!(
                "FAILED: {}",
                result.error_message.as_deref().unwrap_or("no usable series")
            ),
        }
        endpoints.push(result);
    }

    println!("\nVerifying feature store ...");
    let store = verify_store(store, &location.id, now);
    println!(
        "  {} ... {}",
        store.backend,
        match &store.error_message {
            Some(msg) => format!("{}: {}", status_marker(&store.status), msg),
            None => status_marker(&store.status).to_string(),
        }
    );

    let total = endpoints.len() + 1;
    let working = endpoints.iter().filter(|e| e.status.is_working()).count()
        + usize::from(store.status.is_working());

    Ok(VerificationReport {
        timestamp: now.to_rfc3339(),
        location_id: location.id,
        endpoints,
        store,
        summary: VerificationSummary {
            total,
            working,
            failed: total - working,
        },
    })
}

pub fn print_summary(report: &VerificationReport) {
    let rule = "=".repeat(60);
    println!("\n{}", rule);
    println!("VERIFICATION SUMMARY ({})", report.location_id);
    println!("{}", rule);
    for endpoint in &report.endpoints {
        println!("{:<22} {}", endpoint.name, status_marker(&endpoint.status));
    }
    println!("{:<22} {}", format!("store ({})", report.store.backend), status_marker(&report.store.status));
    println!();

    let success_rate = if report.summary.total > 0 {
        (report.summary.working as f64 / report.summary.total as f64) * 100.0
    } else {
        0.0
    };
    println!(
        "Overall Success Rate: {:.1}% ({}/{})",
        success_rate, report.summary.working, report.summary.total
    );
    println!("{}", rule);
}
