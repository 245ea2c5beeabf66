//! aqimon: hourly air-quality features, a daily AQI forecaster, and a text
//! dashboard for one monitored location.

use std::error::Error;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use aqimon_service::config::Config;
use aqimon_service::dashboard::{Dashboard, render};
use aqimon_service::ingest::open_meteo::OpenMeteoClient;
use aqimon_service::logging::{self, DataSource};
use aqimon_service::model::{PipelineError, TimeRange};
use aqimon_service::pipeline::{self, RunOutcome};
use aqimon_service::predict::predict_latest;
use aqimon_service::registry::open_model_registry;
use aqimon_service::schedule::{Job, RetryPolicy, retry_with_backoff};
use aqimon_service::store::{FeatureStore, open_feature_store};
use aqimon_service::verify;

/// Air quality monitoring and AQI forecasting
#[derive(Parser)]
#[command(name = "aqimon")]
#[command(about = "Fetch, feature, train, and forecast the Air Quality Index")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch observations and write engineered features to the store
    Feature {
        /// Range start (RFC 3339); defaults to `fetch.lookback_hours` ago
        #[arg(long, requires = "end")]
        start: Option<DateTime<Utc>>,

        /// Range end, exclusive (RFC 3339)
        #[arg(long, requires = "start")]
        end: Option<DateTime<Utc>>,
    },

    /// Train on the configured window and register a new model version
    Train,

    /// Forecast AQI from the newest feature row with the latest model
    Predict,

    /// Print the dashboard
    Dashboard,

    /// One full cycle: feature run, then training run
    Run,

    /// Stay resident and run both pipelines on their cron schedules
    Daemon,

    /// Check the upstream APIs and the feature store
    Verify,
}

fn open_store_with_retry(config: &Config) -> Result<Box<dyn FeatureStore>, PipelineError> {
    let policy = RetryPolicy::from_config(&config.schedule);
    retry_with_backoff(&policy, DataSource::Store, None, "open store", || open_feature_store(config))
}

/// Read-only commands still run when the store cannot be opened.
fn borrow_store(
    opened: &mut Result<Box<dyn FeatureStore>, PipelineError>,
) -> Result<&mut dyn FeatureStore, PipelineError> {
    match opened {
        Ok(store) => Ok(store.as_mut()),
        Err(e) => Err(PipelineError::StoreUnavailable(e.to_string())),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    logging::init_logger(level, config.logging.file.as_deref(), config.logging.timestamps)?;

    let now = Utc::now();
    let location = config.resolve_location()?;

    match cli.command {
        Commands::Feature { start, end } => {
            let range = match (start, end) {
                (Some(start), Some(end)) => TimeRange::new(start, end)?,
                _ => pipeline::feature_range(now, config.fetch.lookback_hours)?,
            };
            let source = OpenMeteoClient::new(&config.fetch)?;
            let mut store = open_store_with_retry(&config)?;
            let summary = pipeline::run_feature_pipeline(&config, &source, store.as_mut(), &range, now)?;
            match summary.outcome {
                RunOutcome::Completed => println!(
                    "{}: wrote {} feature rows ({} dropped, {} missing hours)",
                    summary.location_id, summary.written, summary.dropped, summary.gap_hours
                ),
                RunOutcome::Skipped { reason } => println!("{}: skipped: {}", summary.location_id, reason),
            }
        }
        Commands::Train => {
            let mut store = open_store_with_retry(&config)?;
            let mut registry = open_model_registry(&config);
            let summary = pipeline::run_training_pipeline(&config, store.as_mut(), registry.as_mut(), now)?;
            println!("trained on {} rows from {}", summary.rows_read, summary.location_id);
            for artifact in &summary.artifacts {
                let metrics = &artifact.spec.metrics;
                println!(
                    "  registered {} v{}: MAE {:.2} (baseline {:.2}), RMSE {:.2}, R² {:.3}",
                    artifact.name(),
                    artifact.version,
                    metrics.mae,
                    metrics.baseline_mae,
                    metrics.rmse,
                    metrics.r2
                );
            }
        }
        Commands::Predict => {
            let mut store = open_store_with_retry(&config)?;
            let registry = open_model_registry(&config);
            let model_name = config.registry.serving_model_name();
            let p = predict_latest(store.as_mut(), registry.as_ref(), &location.id, model_name)?;
            println!(
                "{}: AQI {:.0} ({}) expected at {} [{} v{}, from {}]",
                p.location_id,
                p.predicted_aqi,
                p.category,
                p.target_time.format("%Y-%m-%d %H:%M UTC"),
                p.model_name,
                p.model_version,
                p.based_on.format("%Y-%m-%d %H:%M UTC")
            );
        }
        Commands::Dashboard => {
            let board = Dashboard::from_config(&config)?;
            let registry = open_model_registry(&config);
            let mut opened = open_feature_store(&config);
            let store = borrow_store(&mut opened);
            let view = board.refresh(store, registry.as_ref(), now);
            println!("{}", render(&view));
        }
        Commands::Run => {
            let source = OpenMeteoClient::new(&config.fetch)?;
            let mut store = open_store_with_retry(&config)?;
            let mut registry = open_model_registry(&config);
            let jobs = [Job::Features, Job::Training];
            let failed = pipeline::run_jobs(&config, &jobs, &source, store.as_mut(), registry.as_mut(), now);
            if failed > 0 {
                return Err(format!("{} of {} jobs failed", failed, jobs.len()).into());
            }
        }
        Commands::Daemon => {
            let source = OpenMeteoClient::new(&config.fetch)?;
            let mut store = open_store_with_retry(&config)?;
            let mut registry = open_model_registry(&config);
            logging::info(
                DataSource::System,
                Some(&location.id),
                &format!(
                    "daemon started: features '{}', training '{}'",
                    config.schedule.cron, config.schedule.training_cron
                ),
            );
            pipeline::run_daemon(&config, &source, store.as_mut(), registry.as_mut())?;
        }
        Commands::Verify => {
            let mut opened = open_feature_store(&config);
            let store = borrow_store(&mut opened);
            let report = verify::run_full_verification(&config, store)?;
            verify::print_summary(&report);
            if report.summary.failed > 0 {
                return Err(format!("{} of {} checks failed", report.summary.failed, report.summary.total).into());
            }
        }
    }

    Ok(())
}
