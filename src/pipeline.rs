/// Pipeline runs.
///
/// Two independent jobs share the feature store:
/// - the feature run: Fetch → Build → Store, hourly;
/// - the training run: Store → Train → Registry, daily.
///
/// Each run holds the data-directory `RunLock` for its whole duration,
/// retries retryable failures with backoff, and ends with a run summary in
/// the log. A feature run fetches `CONTEXT_HOURS` before its range so the
/// rows it writes carry the same lags and rolling means however the runs
/// overlap. A data gap upstream skips the feature run with an alert; an
/// undersized training window aborts training and leaves the previously
/// registered model active.

use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::analysis::features::{BuildReport, CONTEXT_HOURS, build_features};
use crate::config::Config;
use crate::ingest::{ObservationSource, fetch_observations};
use crate::logging::{self, DataSource};
use crate::model::{PipelineError, TimeRange};
use crate::registry::{ModelArtifact, ModelRegistry};
use crate::schedule::{Job, JobSchedule, RetryPolicy, RunLock, retry_with_backoff};
use crate::store::FeatureStore;
use crate::train::{Trainer, training_window};

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    /// Nothing to do; the reason has been logged as an alert.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRunSummary {
    pub location_id: String,
    pub range: TimeRange,
    pub fetched: usize,
    pub built: usize,
    pub dropped: usize,
    pub gap_hours: i64,
    pub written: usize,
    pub outcome: RunOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRunSummary {
    pub location_id: String,
    pub window: TimeRange,
    pub rows_read: usize,
    /// One artifact per configured model kind, in `training.models` order.
    pub artifacts: Vec<ModelArtifact>,
}

/// The hours a scheduled feature run at `now` covers: the last
/// `lookback_hours` complete-or-current hours, ending after the current one.
pub fn feature_range(now: DateTime<Utc>, lookback_hours: i64) -> Result<TimeRange, PipelineError> {
    let current = now
        .duration_trunc(Duration::hours(1))
        .map_err(|e| PipelineError::Validation(format!("cannot align {}: {}", now, e)))?;
    let end = current + Duration::hours(1);
    TimeRange::new(hours_before(end, lookback_hours)?, end)
}

fn hours_before(t: DateTime<Utc>, hours: i64) -> Result<DateTime<Utc>, PipelineError> {
    Duration::try_hours(hours)
        .and_then(|span| t.checked_sub_signed(span))
        .ok_or_else(|| PipelineError::Config(format!("{} hours before {} is out of range", hours, t)))
}

/// `range` widened backwards by the feature context.
pub fn fetch_range(range: &TimeRange) -> Result<TimeRange, PipelineError> {
    TimeRange::new(hours_before(range.start, CONTEXT_HOURS)?, range.end)
}

fn acquire_lock(config: &Config, now: DateTime<Utc>) -> Result<RunLock, PipelineError> {
    let max_age = Duration::minutes(config.schedule.max_run_minutes as i64);
    RunLock::acquire(&config.lock_path(), max_age, now).inspect_err(|e| {
        logging::log_failure(DataSource::Scheduler, None, "acquire run lock", e);
    })
}

/// Fetch → Build → Store for the configured location over `range`.
pub fn run_feature_pipeline(
    config: &Config,
    source: &dyn ObservationSource,
    store: &mut dyn FeatureStore,
    range: &TimeRange,
    now: DateTime<Utc>,
) -> Result<FeatureRunSummary, PipelineError> {
    let _lock = acquire_lock(config, now)?;
    let location = config.resolve_location()?;
    let loc = Some(location.id.as_str());
    let policy = RetryPolicy::from_config(&config.schedule);

    logging::info(
        DataSource::Scheduler,
        loc,
        &format!(
            "feature run: {} → {} via {} into {} store",
            range.start.format("%Y-%m-%d %H:%M"),
            range.end.format("%Y-%m-%d %H:%M"),
            source.name(),
            store.backend()
        ),
    );

    let mut summary = FeatureRunSummary {
        location_id: location.id.clone(),
        range: *range,
        fetched: 0,
        built: 0,
        dropped: 0,
        gap_hours: 0,
        written: 0,
        outcome: RunOutcome::Completed,
    };

    let fetch_window = fetch_range(range)?;
    let observations = match retry_with_backoff(&policy, DataSource::OpenMeteo, loc, "fetch", || {
        fetch_observations(source, &location, &fetch_window)
    }) {
        Ok(obs) => obs,
        Err(e @ PipelineError::DataGap { .. }) => {
            logging::log_failure(DataSource::OpenMeteo, loc, "fetch", &e);
            summary.outcome = RunOutcome::Skipped { reason: e.to_string() };
            logging::log_run_summary(DataSource::Scheduler, 1, 0, 1);
            return Ok(summary);
        }
        Err(e) => {
            logging::log_failure(DataSource::OpenMeteo, loc, "fetch", &e);
            return Err(e);
        }
    };
    summary.fetched = observations.iter().filter(|o| range.contains(o.timestamp)).count();

    // Context hours only feed lags and rolling means; the run owns `range`.
    let BuildReport { rows, dropped, gaps } = build_features(&observations)?;
    let rows: Vec<_> = rows.into_iter().filter(|r| range.contains(r.timestamp)).collect();
    summary.built = rows.len();
    summary.dropped = dropped.iter().filter(|d| range.contains(d.timestamp)).count();
    summary.gap_hours = gaps
        .iter()
        .map(|g| (g.to.min(range.end) - g.from.max(range.start)).num_hours().max(0))
        .sum();
    if summary.gap_hours > 0 {
        logging::warn(
            DataSource::Features,
            loc,
            &format!("{} missing hours across {} gaps", summary.gap_hours, gaps.len()),
        );
    }

    if rows.is_empty() {
        let reason = format!(
            "no valid feature rows in range ({} observations fetched, {} dropped)",
            summary.fetched, summary.dropped
        );
        logging::warn(DataSource::Features, loc, &reason);
        summary.outcome = RunOutcome::Skipped { reason };
        logging::log_run_summary(DataSource::Scheduler, summary.fetched, 0, summary.dropped);
        return Ok(summary);
    }

    summary.written = retry_with_backoff(&policy, DataSource::Store, loc, "write", || store.write(&rows))
        .inspect_err(|e| logging::log_failure(DataSource::Store, loc, "write", e))?;

    logging::info(
        DataSource::Store,
        loc,
        &format!("wrote {} feature rows ({} dropped)", summary.written, summary.dropped),
    );
    logging::log_run_summary(DataSource::Scheduler, summary.fetched, summary.written, summary.dropped);
    Ok(summary)
}

/// Store → Train → Registry over the configured training window.
///
/// Every configured model kind is fitted before any is registered, so an
/// undersized window or a failed fit leaves the registry untouched.
pub fn run_training_pipeline(
    config: &Config,
    store: &mut dyn FeatureStore,
    registry: &mut dyn ModelRegistry,
    now: DateTime<Utc>,
) -> Result<TrainingRunSummary, PipelineError> {
    let _lock = acquire_lock(config, now)?;
    let location = config.resolve_location()?;
    let loc = Some(location.id.as_str());
    let policy = RetryPolicy::from_config(&config.schedule);
    let window = training_window(now, config.training.window_days)?;

    let rows = retry_with_backoff(&policy, DataSource::Store, loc, "read", || {
        store.read(&location.id, &window)
    })
    .inspect_err(|e| logging::log_failure(DataSource::Store, loc, "read", e))?;

    let mut candidates = Vec::with_capacity(config.training.models.len());
    for &kind in &config.training.models {
        let trainer = Trainer::new(config.training.clone(), kind, config.registry.name_for(kind));
        let candidate = trainer
            .train(&location.id, &rows, &window, now)
            .inspect_err(|e| logging::log_failure(DataSource::Trainer, loc, &format!("train {}", kind), e))?;
        candidates.push(candidate);
    }

    let mut artifacts = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let previous = registry.get_latest(&candidate.name)?;
        let artifact = registry
            .register(candidate)
            .inspect_err(|e| logging::log_failure(DataSource::Registry, loc, "register", e))?;

        let comparison = match &previous {
            Some(prev) => format!(" (v{} MAE {:.2})", prev.version, prev.spec.metrics.mae),
            None => String::new(),
        };
        logging::info(
            DataSource::Registry,
            loc,
            &format!(
                "registered {} v{}: MAE {:.2}{}",
                artifact.name(),
                artifact.version,
                artifact.spec.metrics.mae,
                comparison
            ),
        );
        artifacts.push(artifact);
    }

    if let Some(best) = artifacts
        .iter()
        .min_by(|a, b| a.spec.metrics.mae.total_cmp(&b.spec.metrics.mae))
        .filter(|_| artifacts.len() > 1)
    {
        logging::info(
            DataSource::Trainer,
            loc,
            &format!("lowest held-out MAE this run: {} ({:.2})", best.name(), best.spec.metrics.mae),
        );
    }

    Ok(TrainingRunSummary {
        location_id: location.id.clone(),
        window,
        rows_read: rows.len(),
        artifacts,
    })
}

/// Runs `jobs` in order. Failures are logged and counted, not propagated,
/// so one bad run never stops the daemon.
pub fn run_jobs(
    config: &Config,
    jobs: &[Job],
    source: &dyn ObservationSource,
    store: &mut dyn FeatureStore,
    registry: &mut dyn ModelRegistry,
    now: DateTime<Utc>,
) -> usize {
    let mut failed = 0;
    for job in jobs {
        let result = match job {
            Job::Features => feature_range(now, config.fetch.lookback_hours)
                .and_then(|range| run_feature_pipeline(config, source, &mut *store, &range, now))
                .map(|_| ()),
            Job::Training => run_training_pipeline(config, store, registry, now).map(|_| ()),
        };
        if let Err(e) = result {
            logging::log_failure(DataSource::Scheduler, None, &format!("{:?} job", job), &e);
            failed += 1;
        }
    }
    logging::log_run_summary(DataSource::Scheduler, jobs.len(), jobs.len() - failed, failed);
    failed
}

/// Sleeps until each cron occurrence and runs the due jobs. Never returns
/// unless the schedule has no further occurrences.
pub fn run_daemon(
    config: &Config,
    source: &dyn ObservationSource,
    store: &mut dyn FeatureStore,
    registry: &mut dyn ModelRegistry,
) -> Result<(), PipelineError> {
    let schedule = JobSchedule::from_config(&config.schedule)?;
    loop {
        let Some((when, jobs)) = schedule.next_after(Utc::now()) else {
            logging::warn(DataSource::Scheduler, None, "no further scheduled runs; exiting");
            return Ok(());
        };
        logging::info(
            DataSource::Scheduler,
            None,
            &format!("next run {:?} at {}", jobs, when.format("%Y-%m-%d %H:%M UTC")),
        );
        if let Ok(wait) = (when - Utc::now()).to_std() {
            std::thread::sleep(wait);
        }
        run_jobs(config, &jobs, source, store, registry, when);
    }
}
