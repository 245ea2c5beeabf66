/// Scheduler glue: cron evaluation, retry with backoff, and the run lock.
///
/// The pipeline is normally driven by an external timer (CI cron) calling
/// the one-shot commands; `daemon` mode uses `JobSchedule` to do the same
/// in-process. Either way the `RunLock` guarantees that two invocations
/// never execute concurrently against the same data directory.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::config::ScheduleConfig;
use crate::logging::{self, DataSource};
use crate::model::PipelineError;

// ---------------------------------------------------------------------------
// Cron
// ---------------------------------------------------------------------------

/// Pads a standard 5-field expression with a leading seconds field, since
/// the `cron` crate expects `sec min hour dom month dow`.
pub fn normalize_cron_expr(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

pub fn parse_cron(expr: &str) -> Result<Schedule, cron::error::Error> {
    Schedule::from_str(&normalize_cron_expr(expr))
}

/// First occurrence of `expr` strictly after `after`.
pub fn next_run_after(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, PipelineError> {
    let schedule = parse_cron(expr).map_err(|e| PipelineError::Config(format!("{}: {}", expr, e)))?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| PipelineError::Config(format!("{}: no next occurrence", expr)))
}

/// Which pipeline a daemon wake-up should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Features,
    Training,
}

pub struct JobSchedule {
    features: Schedule,
    training: Schedule,
}

impl JobSchedule {
    pub fn from_config(config: &ScheduleConfig) -> Result<Self, PipelineError> {
        let parse = |field: &str, expr: &str| {
            parse_cron(expr).map_err(|e| PipelineError::Config(format!("schedule.{}: {}", field, e)))
        };
        Ok(Self {
            features: parse("cron", &config.cron)?,
            training: parse("training_cron", &config.training_cron)?,
        })
    }

    /// Next wake-up after `now` and every job due at that instant.
    /// Features run before training when both coincide.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, Vec<Job>)> {
        let f = self.features.after(&now).next();
        let t = self.training.after(&now).next();
        match (f, t) {
            (Some(f), Some(t)) if f == t => Some((f, vec![Job::Features, Job::Training])),
            (Some(f), Some(t)) if f < t => Some((f, vec![Job::Features])),
            (_, Some(t)) => Some((t, vec![Job::Training])),
            (Some(f), None) => Some((f, vec![Job::Features])),
            (None, None) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: StdDuration = StdDuration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first.
    pub retries: u32,
    pub base_delay: StdDuration,
}

impl RetryPolicy {
    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self {
            retries: config.retry_count,
            base_delay: StdDuration::from_secs(config.retry_backoff_secs),
        }
    }

    /// No retries, no sleeping.
    pub fn none() -> Self {
        Self { retries: 0, base_delay: StdDuration::ZERO }
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> StdDuration {
        self.base_delay
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

/// Runs `op`, retrying retryable failures per `policy`. Non-retryable errors
/// and the final failure are returned unchanged.
pub fn retry_with_backoff<T>(
    policy: &RetryPolicy,
    source: DataSource,
    location: Option<&str>,
    operation: &str,
    mut op: impl FnMut() -> Result<T, PipelineError>,
) -> Result<T, PipelineError> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.retries => {
                let delay = policy.delay_for(attempt);
                logging::warn(
                    source,
                    location,
                    &format!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation,
                        attempt + 1,
                        policy.retries + 1,
                        e,
                        delay
                    ),
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Run lock
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Exclusive claim on the data directory for one pipeline run. Released on
/// drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Takes the lock at `path`. A lock older than `max_age` is considered
    /// abandoned by a crashed run and replaced.
    pub fn acquire(path: &Path, max_age: Duration, now: DateTime<Utc>) -> Result<Self, PipelineError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        match Self::create(path, now) {
            Err(PipelineError::RunInProgress(_)) if Self::is_abandoned(path, max_age, now) => {
                logging::warn(
                    DataSource::Scheduler,
                    None,
                    &format!("replacing abandoned run lock {}", path.display()),
                );
                fs::remove_file(path)?;
                Self::create(path, now)
            }
            other => other,
        }
    }

    fn create(path: &Path, now: DateTime<Utc>) -> Result<Self, PipelineError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(PipelineError::RunInProgress(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let info = LockInfo { pid: std::process::id(), acquired_at: now };
        let body = serde_json::to_string(&info).map_err(|e| PipelineError::Parse(e.to_string()))?;
        file.write_all(body.as_bytes())?;
        Ok(Self { path: path.to_path_buf() })
    }

    /// Age comes from the recorded `acquired_at`. A body that cannot be
    /// parsed (a run that crashed mid-write, or a truncated file) falls back
    /// to the file's modification time. A lock whose age cannot be read at
    /// all is held.
    fn is_abandoned(path: &Path, max_age: Duration, now: DateTime<Utc>) -> bool {
        let recorded = fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str::<LockInfo>(&text).ok())
            .map(|info| info.acquired_at);
        let acquired_at = match recorded {
            Some(at) => at,
            None => match fs::metadata(path).and_then(|m| m.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(_) => return false,
            },
        };
        now - acquired_at > max_age
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            logging::warn(
                DataSource::Scheduler,
                None,
                &format!("could not release run lock {}: {}", self.path.display(), e),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::Cell;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_normalize_cron_expr() {
        assert_eq!(normalize_cron_expr("5 * * * *"), "0 5 * * * *");
        assert_eq!(normalize_cron_expr("  0 5 * * * *  "), "0 5 * * * *");
    }

    #[test]
    fn test_parse_cron_accepts_five_and_six_fields() {
        assert!(parse_cron("5 * * * *").is_ok());
        assert!(parse_cron("0 30 3 * * *").is_ok());
        assert!(parse_cron("every hour").is_err());
        assert!(parse_cron("").is_err());
    }

    #[test]
    fn test_next_run_after() {
        assert_eq!(next_run_after("5 * * * *", at(10, 0)).unwrap(), at(10, 5));
        // strictly after
        assert_eq!(next_run_after("5 * * * *", at(10, 5)).unwrap(), at(11, 5));
        assert!(next_run_after("nonsense", at(10, 0)).is_err());
    }

    #[test]
    fn test_job_schedule_orders_and_merges_jobs() {
        let config = ScheduleConfig {
            cron: "0 * * * *".to_string(),
            training_cron: "0 3 * * *".to_string(),
            ..ScheduleConfig::default()
        };
        let schedule = JobSchedule::from_config(&config).unwrap();

        let (when, jobs) = schedule.next_after(at(1, 30)).unwrap();
        assert_eq!(when, at(2, 0));
        assert_eq!(jobs, vec![Job::Features]);

        let (when, jobs) = schedule.next_after(at(2, 30)).unwrap();
        assert_eq!(when, at(3, 0));
        assert_eq!(jobs, vec![Job::Features, Job::Training]);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy { retries: 3, base_delay: StdDuration::from_secs(5) };
        assert_eq!(policy.delay_for(0), StdDuration::from_secs(5));
        assert_eq!(policy.delay_for(1), StdDuration::from_secs(10));
        assert_eq!(policy.delay_for(2), StdDuration::from_secs(20));
        assert_eq!(policy.delay_for(40), MAX_BACKOFF);
    }

    #[test]
    fn test_retry_recovers_from_transient_errors() {
        let policy = RetryPolicy { retries: 3, base_delay: StdDuration::ZERO };
        let calls = Cell::new(0);
        let result = retry_with_backoff(&policy, DataSource::Store, None, "write", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(PipelineError::StoreUnavailable("down".to_string()))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_gives_up_after_budget() {
        let policy = RetryPolicy { retries: 2, base_delay: StdDuration::ZERO };
        let calls = Cell::new(0);
        let result: Result<(), _> = retry_with_backoff(&policy, DataSource::OpenMeteo, None, "fetch", || {
            calls.set(calls.get() + 1);
            Err(PipelineError::Network("timeout".to_string()))
        });
        assert!(matches!(result, Err(PipelineError::Network(_))));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_non_retryable_errors_fail_fast() {
        let policy = RetryPolicy { retries: 5, base_delay: StdDuration::ZERO };
        let calls = Cell::new(0);
        let result: Result<(), _> = retry_with_backoff(&policy, DataSource::Store, None, "write", || {
            calls.set(calls.get() + 1);
            Err(PipelineError::Validation("bad row".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_run_lock_prevents_overlap_and_releases_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aqimon.lock");
        let max_age = Duration::minutes(30);

        let lock = RunLock::acquire(&path, max_age, at(10, 0)).unwrap();
        assert!(path.exists());
        assert!(matches!(
            RunLock::acquire(&path, max_age, at(10, 10)),
            Err(PipelineError::RunInProgress(_))
        ));

        drop(lock);
        assert!(!path.exists());
        assert!(RunLock::acquire(&path, max_age, at(10, 20)).is_ok());
    }

    #[test]
    fn test_abandoned_lock_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aqimon.lock");
        let max_age = Duration::minutes(30);

        let stale = RunLock::acquire(&path, max_age, at(10, 0)).unwrap();
        std::mem::forget(stale); // simulate a crashed run

        let fresh = RunLock::acquire(&path, max_age, at(11, 0)).unwrap();
        assert_eq!(fresh.path(), path.as_path());
    }

    fn empty_lock(path: &Path, modified: DateTime<Utc>) {
        let file = fs::File::create(path).unwrap();
        file.set_modified(modified.into()).unwrap();
    }

    #[test]
    fn test_empty_lock_ages_by_modification_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aqimon.lock");
        let max_age = Duration::minutes(30);

        // crashed before writing its body, an hour ago
        empty_lock(&path, at(9, 0));
        let taken = RunLock::acquire(&path, max_age, at(10, 0)).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("acquired_at"));
        drop(taken);

        // still being written
        empty_lock(&path, at(9, 50));
        assert!(matches!(
            RunLock::acquire(&path, max_age, at(10, 0)),
            Err(PipelineError::RunInProgress(_))
        ));
    }
}
