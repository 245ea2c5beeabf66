//! In-process feature store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::model::{FeatureRow, PipelineError, TimeRange};
use crate::store::FeatureStore;

type Key = (String, DateTime<Utc>);

#[derive(Debug, Default, Clone)]
pub struct MemoryFeatureStore {
    rows: BTreeMap<Key, FeatureRow>,
}

impl MemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<FeatureRow>) -> Self {
        let mut store = Self::new();
        store.upsert(&rows);
        store
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every row, ordered by location then time.
    pub fn all_rows(&self) -> Vec<FeatureRow> {
        self.rows.values().cloned().collect()
    }

    fn upsert(&mut self, rows: &[FeatureRow]) -> usize {
        for row in rows {
            self.rows
                .insert((row.location_id.clone(), row.timestamp), row.clone());
        }
        rows.len()
    }

    fn range_for(&self, location_id: &str, window: &TimeRange) -> Vec<FeatureRow> {
        let from = (location_id.to_string(), window.start);
        let to = (location_id.to_string(), window.end);
        self.rows.range(from..to).map(|(_, r)| r.clone()).collect()
    }
}

impl FeatureStore for MemoryFeatureStore {
    fn backend(&self) -> &str {
        "memory"
    }

    fn write(&mut self, rows: &[FeatureRow]) -> Result<usize, PipelineError> {
        Ok(self.upsert(rows))
    }

    fn read(&mut self, location_id: &str, window: &TimeRange) -> Result<Vec<FeatureRow>, PipelineError> {
        Ok(self.range_for(location_id, window))
    }

    fn latest(&mut self, location_id: &str, limit: usize) -> Result<Vec<FeatureRow>, PipelineError> {
        let mut newest: Vec<FeatureRow> = self
            .rows
            .iter()
            .rev()
            .filter(|((loc, _), _)| loc == location_id)
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect();
        newest.reverse();
        Ok(newest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{hour, row};

    fn window(a: i64, b: i64) -> TimeRange {
        TimeRange::new(hour(a), hour(b)).unwrap()
    }

    #[test]
    fn test_write_then_read_returns_same_rows() {
        let mut store = MemoryFeatureStore::new();
        let rows: Vec<_> = (0..24).map(|h| row("karachi", h, 40.0 + h as f64)).collect();
        assert_eq!(store.write(&rows).unwrap(), 24);
        assert_eq!(store.read("karachi", &window(0, 24)).unwrap(), rows);
    }

    #[test]
    fn test_read_of_unwritten_window_is_empty() {
        let mut store = MemoryFeatureStore::new();
        store.write(&[row("karachi", 0, 50.0)]).unwrap();
        assert!(store.read("karachi", &window(100, 200)).unwrap().is_empty());
        assert!(store.read("lahore", &window(0, 24)).unwrap().is_empty());
    }

    #[test]
    fn test_write_is_idempotent_upsert() {
        let mut store = MemoryFeatureStore::new();
        store.write(&[row("karachi", 0, 50.0), row("karachi", 1, 60.0)]).unwrap();
        store.write(&[row("karachi", 0, 50.0), row("karachi", 1, 60.0)]).unwrap();
        assert_eq!(store.len(), 2);

        store.write(&[row("karachi", 1, 75.0)]).unwrap();
        let rows = store.read("karachi", &window(0, 2)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].aqi, 75.0);
    }

    #[test]
    fn test_read_window_is_half_open() {
        let mut store = MemoryFeatureStore::new();
        let rows: Vec<_> = (0..5).map(|h| row("karachi", h, 10.0)).collect();
        store.write(&rows).unwrap();
        let got = store.read("karachi", &window(1, 3)).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].timestamp, hour(1));
        assert_eq!(got[1].timestamp, hour(2));
    }

    #[test]
    fn test_locations_do_not_leak() {
        let mut store = MemoryFeatureStore::new();
        store.write(&[row("karachi", 0, 10.0), row("lahore", 0, 90.0)]).unwrap();
        let got = store.read("karachi", &window(0, 1)).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].aqi, 10.0);
    }

    #[test]
    fn test_latest_returns_newest_ascending() {
        let mut store = MemoryFeatureStore::new();
        let rows: Vec<_> = (0..10).map(|h| row("karachi", h, h as f64)).collect();
        store.write(&rows).unwrap();
        store.write(&[row("lahore", 50, 1.0)]).unwrap();
        let latest = store.latest("karachi", 3).unwrap();
        let hours: Vec<_> = latest.iter().map(|r| r.timestamp).collect();
        assert_eq!(hours, vec![hour(7), hour(8), hour(9)]);
        assert!(store.latest("delhi", 3).unwrap().is_empty());
    }
}
