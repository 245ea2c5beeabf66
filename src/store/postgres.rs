//! PostgreSQL feature store.
//!
//! Rows live in `features.feature_rows`, one row per `(location_id,
//! observed_at)`. The full `FeatureRow` is kept as JSONB so new engineered
//! columns do not need a migration; `aqi` is duplicated into a real column
//! for ad-hoc SQL.

use chrono::{DateTime, Utc};
use postgres::{Client, NoTls};

use crate::logging::{self, DataSource};
use crate::model::{FeatureRow, PipelineError, TimeRange};
use crate::store::FeatureStore;

const SCHEMA_SQL: &str = "
    CREATE SCHEMA IF NOT EXISTS features;
    CREATE TABLE IF NOT EXISTS features.feature_rows (
        location_id  TEXT             NOT NULL,
        observed_at  TIMESTAMPTZ      NOT NULL,
        aqi          DOUBLE PRECISION NOT NULL,
        payload      JSONB            NOT NULL,
        written_at   TIMESTAMPTZ      NOT NULL DEFAULT now(),
        PRIMARY KEY (location_id, observed_at)
    );
";

const UPSERT_SQL: &str = "
    INSERT INTO features.feature_rows (location_id, observed_at, aqi, payload)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (location_id, observed_at)
    DO UPDATE SET aqi = EXCLUDED.aqi,
                  payload = EXCLUDED.payload,
                  written_at = now()
";

/// Connectivity problems are retryable; errors the server reported are not.
pub fn map_pg_error(e: postgres::Error) -> PipelineError {
    if e.as_db_error().is_some() {
        PipelineError::Store(e.to_string())
    } else {
        PipelineError::StoreUnavailable(e.to_string())
    }
}

pub struct PostgresFeatureStore {
    client: Client,
}

impl PostgresFeatureStore {
    /// Connect and make sure the schema exists.
    pub fn connect(database_url: &str) -> Result<Self, PipelineError> {
        let client = Client::connect(database_url, NoTls).map_err(map_pg_error)?;
        let mut store = Self { client };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn ensure_schema(&mut self) -> Result<(), PipelineError> {
        self.client.batch_execute(SCHEMA_SQL).map_err(map_pg_error)
    }

    fn decode(rows: Vec<postgres::Row>) -> Result<Vec<FeatureRow>, PipelineError> {
        rows.into_iter()
            .map(|row| {
                let payload: serde_json::Value = row.get(0);
                serde_json::from_value(payload)
                    .map_err(|e| PipelineError::Store(format!("undecodable feature row: {}", e)))
            })
            .collect()
    }
}

impl FeatureStore for PostgresFeatureStore {
    fn backend(&self) -> &str {
        "postgres"
    }

    fn write(&mut self, rows: &[FeatureRow]) -> Result<usize, PipelineError> {
        let mut tx = self.client.transaction().map_err(map_pg_error)?;
        let statement = tx.prepare(UPSERT_SQL).map_err(map_pg_error)?;

        for row in rows {
            let payload = serde_json::to_value(row).map_err(|e| PipelineError::Store(e.to_string()))?;
            tx.execute(&statement, &[&row.location_id, &row.timestamp, &row.aqi, &payload])
                .map_err(map_pg_error)?;
        }

        tx.commit().map_err(map_pg_error)?;
        logging::debug(
            DataSource::Store,
            rows.first().map(|r| r.location_id.as_str()),
            &format!("upserted {} rows", rows.len()),
        );
        Ok(rows.len())
    }

    fn read(&mut self, location_id: &str, window: &TimeRange) -> Result<Vec<FeatureRow>, PipelineError> {
        let rows = self
            .client
            .query(
                "SELECT payload FROM features.feature_rows
                 WHERE location_id = $1 AND observed_at >= $2 AND observed_at < $3
                 ORDER BY observed_at ASC",
                &[&location_id, &window.start, &window.end],
            )
            .map_err(map_pg_error)?;
        Self::decode(rows)
    }

    fn latest(&mut self, location_id: &str, limit: usize) -> Result<Vec<FeatureRow>, PipelineError> {
        let limit = limit as i64;
        let rows = self
            .client
            .query(
                "SELECT payload FROM (
                     SELECT payload, observed_at FROM features.feature_rows
                     WHERE location_id = $1
                     ORDER BY observed_at DESC
                     LIMIT $2
                 ) newest ORDER BY observed_at ASC",
                &[&location_id, &limit],
            )
            .map_err(map_pg_error)?;
        Self::decode(rows)
    }
}

impl PostgresFeatureStore {
    /// Earliest and latest stored hour for a location, if any.
    pub fn data_range(
        &mut self,
        location_id: &str,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, PipelineError> {
        let row = self
            .client
            .query_one(
                "SELECT MIN(observed_at), MAX(observed_at)
                 FROM features.feature_rows
                 WHERE location_id = $1",
                &[&location_id],
            )
            .map_err(map_pg_error)?;

        let min: Option<DateTime<Utc>> = row.get(0);
        let max: Option<DateTime<Utc>> = row.get(1);

        match (min, max) {
            (Some(start), Some(end)) => Ok(Some((start, end))),
            _ => Ok(None),
        }
    }
}
