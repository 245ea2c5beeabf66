/// Observation ingestion.
///
/// `ObservationSource` is the seam between the pipeline and whatever
/// supplies raw observations: the Open-Meteo client in production, a fixed
/// fixture in tests. `fetch_observations` wraps any source and enforces the
/// output contract (in range, ascending, one row per timestamp, non-empty).
///
/// Submodules:
/// - `open_meteo`: Open-Meteo weather + air-quality HTTP client.

pub mod open_meteo;

use crate::locations::Location;
use crate::model::{Observation, PipelineError, TimeRange};

/// Anything that can produce raw observations for a location and range.
pub trait ObservationSource {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Returns observations for `range`. Ordering and duplicates are not
    /// guaranteed here; `fetch_observations` normalises them.
    fn fetch(&self, location: &Location, range: &TimeRange) -> Result<Vec<Observation>, PipelineError>;
}

/// Filters to `range`, sorts ascending, and removes duplicate timestamps
/// (first occurrence wins). Fails with `DataGap` if nothing is left.
pub fn normalize_observations(
    location: &Location,
    range: &TimeRange,
    observations: Vec<Observation>,
) -> Result<Vec<Observation>, PipelineError> {
    let mut in_range: Vec<Observation> = observations
        .into_iter()
        .filter(|o| range.contains(o.timestamp))
        .collect();

    // stable sort keeps the first of equal timestamps in front
    in_range.sort_by_key(|o| o.timestamp);
    in_range.dedup_by_key(|o| o.timestamp);

    if in_range.is_empty() {
        return Err(PipelineError::DataGap {
            location: location.id.clone(),
            start: range.start,
            end: range.end,
        });
    }
    Ok(in_range)
}

/// Data Fetcher entry point: fetch from `source` and normalise.
pub fn fetch_observations(
    source: &dyn ObservationSource,
    location: &Location,
    range: &TimeRange,
) -> Result<Vec<Observation>, PipelineError> {
    let raw = source.fetch(location, range)?;
    normalize_observations(location, range, raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn karachi() -> Location {
        crate::locations::find_location("karachi").unwrap().to_location()
    }

    fn day() -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    struct Scrambled;

    impl ObservationSource for Scrambled {
        fn name(&self) -> &str {
            "scrambled"
        }

        fn fetch(&self, location: &Location, range: &TimeRange) -> Result<Vec<Observation>, PipelineError> {
            // reversed, with a duplicate, and one hour outside the range
            let mut out: Vec<Observation> = (0..=24)
                .rev()
                .map(|h| Observation::empty(&location.id, range.start + Duration::hours(h)))
                .collect();
            let mut dup = Observation::empty(&location.id, range.start + Duration::hours(5));
            dup.pm2_5 = Some(1.0);
            out.push(dup);
            Ok(out)
        }
    }

    struct Empty;

    impl ObservationSource for Empty {
        fn name(&self) -> &str {
            "empty"
        }

        fn fetch(&self, _: &Location, _: &TimeRange) -> Result<Vec<Observation>, PipelineError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_fetch_output_is_sorted_unique_and_in_range() {
        let obs = fetch_observations(&Scrambled, &karachi(), &day()).unwrap();
        assert_eq!(obs.len(), 24);
        for pair in obs.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
        assert!(obs.iter().all(|o| day().contains(o.timestamp)));
        // the duplicate came later in input order and was discarded
        assert_eq!(obs[5].pm2_5, None);
    }

    #[test]
    fn test_empty_fetch_is_a_data_gap() {
        let err = fetch_observations(&Empty, &karachi(), &day()).unwrap_err();
        assert!(matches!(err, PipelineError::DataGap { .. }), "got {:?}", err);
    }
}
