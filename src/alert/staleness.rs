/// Feature staleness detection.
///
/// The feature pipeline runs hourly. If the newest stored row falls too far
/// behind, the upstream API, the scheduler, or the store is failing, and the
/// dashboard must say so rather than present old numbers as current.
///
/// # Clock injection
/// All functions accept a `now: DateTime<Utc>` parameter rather than calling
/// `Utc::now()` internally. This makes staleness purely deterministic in
/// tests without mocking or time manipulation.

use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Staleness check
// ---------------------------------------------------------------------------

/// Age of `timestamp` relative to `now`, in whole minutes.
///
/// Timestamps in the future have age zero.
pub fn age_minutes(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - timestamp).num_minutes().max(0) as u64
}

/// Returns `true` if `timestamp` is older than `max_age_minutes` relative
/// to `now`.
///
/// Staleness is defined as strictly greater than the threshold:
///   age > max_age_minutes  →  stale
///   age == max_age_minutes →  not stale
pub fn is_stale_at(timestamp: DateTime<Utc>, max_age_minutes: u64, now: DateTime<Utc>) -> bool {
    age_minutes(timestamp, now) > max_age_minutes
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
