use chrono::{DateTime, Utc};
use tracing::{instrument, warn};

use reel_core::usage::{retention_cutoff, TimestampLog, UsageCounter, UsageCounters, UsageKind};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Lifetime totals plus the pruned event log behind the rolling figures.
pub struct UsageRepo {
    db: Database,
}

impl UsageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append an event at `at`, prune that kind's log to the retention
    /// window, and bump the lifetime total. One transaction.
    #[instrument(skip(self), fields(kind = %kind))]
    pub fn record(&self, kind: UsageKind, at: DateTime<Utc>) -> Result<(), StoreError> {
        let cutoff = retention_cutoff(at).timestamp_millis();
        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO usage_events (kind, at_ms) VALUES (?1, ?2)",
                rusqlite::params![kind.as_str(), at.timestamp_millis()],
            )?;
            tx.execute(
                "DELETE FROM usage_events WHERE kind = ?1 AND at_ms <= ?2",
                rusqlite::params![kind.as_str(), cutoff],
            )?;
            tx.execute(
                "INSERT INTO usage_totals (kind, total) VALUES (?1, 1)
                 ON CONFLICT(kind) DO UPDATE SET total = total + 1",
                [kind.as_str()],
            )?;
            Ok(())
        })
    }

    /// Rebuild in-memory counters. Unreadable event rows are skipped.
    #[instrument(skip(self))]
    pub fn load(&self) -> Result<UsageCounters, StoreError> {
        let mut counters = UsageCounters::default();
        for kind in [UsageKind::ApiCall, UsageKind::Artifact] {
            *counters.counter_mut(kind) = self.load_kind(kind)?;
        }
        Ok(counters)
    }

    fn load_kind(&self, kind: UsageKind) -> Result<UsageCounter, StoreError> {
        self.db.with_conn(|conn| {
            let total: Option<i64> = match conn.query_row(
                "SELECT total FROM usage_totals WHERE kind = ?1",
                [kind.as_str()],
                |r| r.get(0),
            ) {
                Ok(total) => Some(total),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            };

            let mut stmt =
                conn.prepare("SELECT at_ms FROM usage_events WHERE kind = ?1 ORDER BY at_ms")?;
            let mut rows = stmt.query([kind.as_str()])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                let parsed = row_helpers::get::<i64>(row, 0, "usage_events", "at_ms")
                    .and_then(|ms| row_helpers::from_millis(ms, "usage_events", "at_ms"));
                match parsed {
                    Ok(at) => entries.push(at),
                    Err(e) => warn!(error = %e, "skipping unreadable usage event"),
                }
            }

            let log = TimestampLog::from_entries(entries);
            // The total can never be below what the log still holds.
            let total = total.unwrap_or(0).max(0) as u64;
            Ok(UsageCounter {
                total: total.max(log.len() as u64),
                log,
            })
        })
    }
}
