use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use crate::db::{
    helpers::{from_millis, parse_datetime},
    Database,
};

/// Ledger row: one handled occurrence of a scheduled call.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedOccurrence {
    pub call_id: String,
    pub occurrence_at: DateTime<Utc>,
    pub source: String,
    pub processed_at: DateTime<Utc>,
}

fn row_to_occurrence(row: &Row) -> Result<ProcessedOccurrence> {
    let occurrence_ms: i64 = row.get("occurrence_ms")?;
    let processed_at: String = row.get("processed_at")?;

    Ok(ProcessedOccurrence {
        call_id: row.get("call_id")?,
        occurrence_at: from_millis(occurrence_ms, "occurrence_ms")?,
        source: row.get("source")?,
        processed_at: parse_datetime(&processed_at, "processed_at")?,
    })
}

impl Database {
    /// Atomically records `(call_id, occurrence_at)` as handled.
    /// Returns `true` only for the caller that inserted the row.
    pub async fn claim_occurrence(
        &self,
        call_id: &str,
        occurrence_at: DateTime<Utc>,
        source: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let call_id = call_id.to_string();
        let source = source.to_string();
        self.execute(move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO processed_occurrences (call_id, occurrence_ms, source, processed_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        call_id,
                        occurrence_at.timestamp_millis(),
                        source,
                        processed_at.to_rfc3339(),
                    ],
                )
                .with_context(|| "failed to claim occurrence")?;
            Ok(inserted == 1)
        })
        .await
    }

    pub async fn list_processed_occurrences(&self) -> Result<Vec<ProcessedOccurrence>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT call_id, occurrence_ms, source, processed_at
                 FROM processed_occurrences
                 ORDER BY occurrence_ms DESC, call_id ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut occurrences = Vec::new();
            while let Some(row) = rows.next()? {
                occurrences.push(row_to_occurrence(row)?);
            }

            Ok(occurrences)
        })
        .await
    }

    /// Drops ledger rows for occurrences older than `before`. Those instants
    /// are far outside any lookback window and can never be due again.
    pub async fn prune_processed_occurrences(&self, before: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM processed_occurrences WHERE occurrence_ms < ?1",
                    params![before.timestamp_millis()],
                )
                .with_context(|| "failed to prune processed occurrences")?;
            Ok(removed)
        })
        .await
    }

    pub async fn last_processed_occurrence(&self, call_id: &str) -> Result<Option<DateTime<Utc>>> {
        let call_id = call_id.to_string();
        self.execute(move |conn| {
            let latest: Option<i64> = conn
                .query_row(
                    "SELECT MAX(occurrence_ms) FROM processed_occurrences WHERE call_id = ?1",
                    params![call_id],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            latest
                .map(|ms| from_millis(ms, "occurrence_ms"))
                .transpose()
        })
        .await
    }
}
