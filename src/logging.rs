/// Structured logging for the air quality service
///
/// Provides context-rich logging with data-source and location tags on top
/// of the `log` facade. `env_logger` is the backend; when a log file is
/// configured every line is teed to it as well, so scheduled runs leave a
/// run log behind even when the CI runner discards stderr.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use log::Level;

use crate::model::PipelineError;

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    OpenMeteo,
    Features,
    Store,
    Registry,
    Trainer,
    Scheduler,
    Dashboard,
    System,
}

impl DataSource {
    /// The tag used as the `log` target.
    pub fn tag(&self) -> &'static str {
        match self {
            DataSource::OpenMeteo => "OPEN-METEO",
            DataSource::Features => "FEAT",
            DataSource::Store => "STORE",
            DataSource::Registry => "REGISTRY",
            DataSource::Trainer => "TRAIN",
            DataSource::Scheduler => "SCHED",
            DataSource::Dashboard => "DASH",
            DataSource::System => "SYS",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - upstream has no data yet, a row was malformed, or
    /// the window is too small. The run log records it; nobody gets paged.
    Expected,
    /// Unexpected failure - indicates service degradation or misconfiguration
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classify a pipeline failure by its variant.
pub fn classify_failure(err: &PipelineError) -> FailureType {
    match err {
        PipelineError::DataGap { .. }
        | PipelineError::Validation(_)
        | PipelineError::InsufficientData { .. }
        | PipelineError::RunInProgress(_) => FailureType::Expected,
        PipelineError::Network(_)
        | PipelineError::StoreUnavailable(_)
        | PipelineError::Parse(_)
        | PipelineError::Config(_) => FailureType::Unexpected,
        PipelineError::Api { status, .. } if *status >= 500 => FailureType::Unexpected,
        _ => FailureType::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Logger initialisation
// ---------------------------------------------------------------------------

/// Writes every formatted line to stderr and to the log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Initialize the global logger.
///
/// `RUST_LOG` overrides `min_level`. Safe to call more than once; later
/// calls are ignored.
pub fn init_logger(
    min_level: &str,
    log_file: Option<&Path>,
    timestamps: bool,
) -> Result<(), PipelineError> {
    let env = env_logger::Env::default().default_filter_or(min_level);
    let mut builder = env_logger::Builder::from_env(env);

    // File lines always carry a timestamp; console lines only on request.
    let stamp = timestamps || log_file.is_some();
    builder.format(move |buf, record| {
        if stamp {
            writeln!(
                buf,
                "{} {:<5} {}{}",
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                record.level(),
                record.target(),
                record.args()
            )
        } else {
            let marker = match record.level() {
                Level::Error => "✗ ",
                Level::Warn => "⚠ ",
                _ => "",
            };
            writeln!(buf, "   {}{}{}", marker, record.target(), record.args())
        }
    });

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
    }

    // A second init (e.g. daemon re-reading config) keeps the first logger.
    let _ = builder.try_init();
    Ok(())
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

fn emit(level: Level, source: DataSource, location: Option<&str>, message: &str) {
    let location_part = location.map(|l| format!(" [{}]", l)).unwrap_or_default();
    log::log!(target: source.tag(), level, "{}: {}", location_part, message);
}

/// Log a general informational message
pub fn info(source: DataSource, location: Option<&str>, message: &str) {
    emit(Level::Info, source, location, message);
}

/// Log a warning message
pub fn warn(source: DataSource, location: Option<&str>, message: &str) {
    emit(Level::Warn, source, location, message);
}

/// Log an error message
pub fn error(source: DataSource, location: Option<&str>, message: &str) {
    emit(Level::Error, source, location, message);
}

/// Log a debug message
pub fn debug(source: DataSource, location: Option<&str>, message: &str) {
    emit(Level::Debug, source, location, message);
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Level a classified failure is logged at.
pub fn failure_level(failure_type: &FailureType) -> Level {
    match failure_type {
        FailureType::Expected => Level::Warn,
        FailureType::Unexpected => Level::Error,
        FailureType::Unknown => Level::Warn,
    }
}

/// Log a pipeline failure with automatic classification
pub fn log_failure(source: DataSource, location: Option<&str>, operation: &str, err: &PipelineError) {
    let failure_type = classify_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);
    emit(failure_level(&failure_type), source, location, &message);
}

// ---------------------------------------------------------------------------
// Run Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a batch step
pub fn log_run_summary(source: DataSource, total: usize, successful: usize, failed: usize) {
    let message = format!(
        "Run complete: {}/{} successful, {} failed",
        successful, total, failed
    );

    if failed == 0 {
        info(source, None, &message);
    } else if successful == 0 {
        error(source, None, &message);
    } else {
        warn(source, None, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_data_source_tags_are_distinct() {
        let all = [
            DataSource::OpenMeteo,
            DataSource::Features,
            DataSource::Store,
            DataSource::Registry,
            DataSource::Trainer,
            DataSource::Scheduler,
            DataSource::Dashboard,
            DataSource::System,
        ];
        let tags: std::collections::HashSet<_> = all.iter().map(|s| s.tag()).collect();
        assert_eq!(tags.len(), all.len());
    }

    #[test]
    fn test_failure_classification() {
        let gap = PipelineError::DataGap {
            location: "karachi".into(),
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        };
        assert_eq!(classify_failure(&gap), FailureType::Expected);

        let network = PipelineError::Network("connection refused".into());
        assert_eq!(classify_failure(&network), FailureType::Unexpected);

        let bad_request = PipelineError::Api { status: 400, reason: "bad".into() };
        assert_eq!(classify_failure(&bad_request), FailureType::Unknown);

        let outage = PipelineError::Api { status: 502, reason: "gateway".into() };
        assert_eq!(classify_failure(&outage), FailureType::Unexpected);
    }

    #[test]
    fn test_unexpected_failures_log_at_error() {
        assert_eq!(failure_level(&FailureType::Unexpected), Level::Error);
        assert_eq!(failure_level(&FailureType::Expected), Level::Warn);
    }

    #[test]
    fn test_init_logger_is_idempotent() {
        assert!(init_logger("debug", None, false).is_ok());
        assert!(init_logger("info", None, true).is_ok());
        info(DataSource::System, None, "logger initialised twice");
    }
}
