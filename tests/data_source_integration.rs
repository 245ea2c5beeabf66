/// Integration tests against the live Open-Meteo APIs and PostgreSQL
///
/// These tests verify:
/// 1. The forecast + air-quality endpoints return joinable hourly data
/// 2. Old ranges are served by the archive endpoint
/// 3. Fetched observations survive feature building
/// 4. Full pipeline: API → build → postgres store → read back
///
/// Prerequisites:
/// - Internet connectivity to *.open-meteo.com
/// - For the postgres test: DATABASE_URL set in .env
///
/// Run with: cargo test --test data_source_integration -- --ignored --test-threads=1
///
/// Note: These tests make real API calls and may be slow or fail if:
/// - Open-Meteo is down or rate-limiting
/// - The CAMS air-quality model has not yet published the requested hours

use chrono::{Duration, DurationRound, Utc};

use aqimon_service::analysis::features::build_features;
use aqimon_service::config::{Config, FetchConfig};
use aqimon_service::ingest::fetch_observations;
use aqimon_service::ingest::open_meteo::{OpenMeteoClient, WeatherEndpoint};
use aqimon_service::locations::{self, Location};
use aqimon_service::model::TimeRange;
use aqimon_service::pipeline::{RunOutcome, run_feature_pipeline};
use aqimon_service::store::{FeatureStore, PostgresFeatureStore};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn karachi() -> Location {
    locations::find_location("karachi").unwrap().to_location()
}

fn recent_range(hours: i64) -> TimeRange {
    let end = Utc::now().duration_trunc(Duration::hours(1)).unwrap();
    TimeRange::new(end - Duration::hours(hours), end).unwrap()
}

fn client() -> OpenMeteoClient {
    OpenMeteoClient::new(&FetchConfig::default()).expect("client should build")
}

// ---------------------------------------------------------------------------
// Open-Meteo
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn test_recent_range_returns_joined_hours() {
    let range = recent_range(48);
    let observations = fetch_observations(&client(), &karachi(), &range).expect("fetch should succeed");

    println!("✓ {} hourly observations", observations.len());
    assert!(observations.len() >= 40, "expected most of 48 hours, got {}", observations.len());
    assert!(observations.iter().all(|o| range.contains(o.timestamp)));
    assert!(observations.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert!(observations.iter().any(|o| o.pm2_5.is_some()), "no PM2.5 values");
    assert!(observations.iter().any(|o| o.temperature_c.is_some()), "no temperatures");
}

#[test]
#[ignore]
fn test_old_range_uses_archive() {
    let end = Utc::now().duration_trunc(Duration::days(1)).unwrap() - Duration::days(30);
    let range = TimeRange::new(end - Duration::days(2), end).unwrap();
    assert_eq!(WeatherEndpoint::for_range(&range, Utc::now()), WeatherEndpoint::Archive);

    let observations = fetch_observations(&client(), &karachi(), &range).expect("archive fetch should succeed");
    assert_eq!(observations.len(), 48);
    assert!(observations.iter().all(|o| o.temperature_c.is_some()));
}

#[test]
#[ignore]
fn test_live_observations_build_features() {
    let range = recent_range(72);
    let observations = fetch_observations(&client(), &karachi(), &range).unwrap();
    let report = build_features(&observations).unwrap();

    println!(
        "✓ {} feature rows, {} dropped, {} gaps",
        report.rows.len(),
        report.dropped.len(),
        report.gaps.len()
    );
    assert!(!report.rows.is_empty());
    assert!(report.rows.iter().all(|r| (0.0..=500.0).contains(&r.aqi)));
}

// ---------------------------------------------------------------------------
// Full pipeline into PostgreSQL
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn test_full_pipeline_into_postgres() {
    dotenv::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let mut store = PostgresFeatureStore::connect(&url).expect("postgres should be reachable");

    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();

    let range = recent_range(24);
    let summary = run_feature_pipeline(&config, &client(), &mut store, &range, Utc::now()).unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);

    let stored = store.read("karachi", &range).unwrap();
    assert_eq!(stored.len(), summary.built);
    println!("✓ {} rows round-tripped through postgres", stored.len());
}
