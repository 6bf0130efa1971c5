//! Ledger-shaped facade over the task and usage repositories.
//!
//! The engine talks to [`LedgerStore`] only, so it can run against SQLite or
//! against nothing at all.

use chrono::{DateTime, Utc};
use tracing::{instrument, warn};

use reel_core::ids::TaskId;
use reel_core::task::GenerationTask;
use reel_core::usage::{UsageCounters, UsageKind};

use crate::database::Database;
use crate::error::StoreError;
use crate::schema::NEXT_SEQUENCE_KEY;
use crate::tasks::TaskRepo;
use crate::usage::UsageRepo;

/// Everything needed to rebuild an in-memory ledger.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LedgerSnapshot {
    /// Newest first.
    pub tasks: Vec<GenerationTask>,
    pub usage: UsageCounters,
    pub next_sequence: u64,
}

pub trait LedgerStore: Send + Sync {
    fn load(&self) -> Result<LedgerSnapshot, StoreError>;
    fn save_task(&self, task: &GenerationTask) -> Result<(), StoreError>;
    fn delete_task(&self, id: &TaskId) -> Result<bool, StoreError>;
    fn record_usage(&self, kind: UsageKind, at: DateTime<Utc>) -> Result<(), StoreError>;
    fn set_next_sequence(&self, next: u64) -> Result<(), StoreError>;
}

pub struct SqliteLedgerStore {
    db: Database,
    tasks: TaskRepo,
    usage: UsageRepo,
}

impl SqliteLedgerStore {
    pub fn new(db: Database) -> Self {
        Self {
            tasks: TaskRepo::new(db.clone()),
            usage: UsageRepo::new(db.clone()),
            db,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn stored_next_sequence(&self) -> Result<Option<u64>, StoreError> {
        self.db.with_conn(|conn| {
            let raw: Option<String> = match conn.query_row(
                "SELECT value FROM ledger_meta WHERE key = ?1",
                [NEXT_SEQUENCE_KEY],
                |r| r.get(0),
            ) {
                Ok(value) => Some(value),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            };
            Ok(raw.and_then(|v| match v.parse::<u64>() {
                Ok(n) => Some(n),
                Err(_) => {
                    warn!(value = %v, "ignoring unreadable next_sequence");
                    None
                }
            }))
        })
    }
}

impl LedgerStore for SqliteLedgerStore {
    #[instrument(skip(self))]
    fn load(&self) -> Result<LedgerSnapshot, StoreError> {
        let tasks = self.tasks.list()?;
        let usage = self.usage.load()?;
        let floor = self.tasks.max_sequence()? + 1;
        let next_sequence = self
            .stored_next_sequence()?
            .map_or(floor, |stored| stored.max(floor));
        Ok(LedgerSnapshot {
            tasks,
            usage,
            next_sequence,
        })
    }

    fn save_task(&self, task: &GenerationTask) -> Result<(), StoreError> {
        self.tasks.upsert(task)
    }

    fn delete_task(&self, id: &TaskId) -> Result<bool, StoreError> {
        self.tasks.delete(id)
    }

    fn record_usage(&self, kind: UsageKind, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.usage.record(kind, at)
    }

    fn set_next_sequence(&self, next: u64) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ledger_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                rusqlite::params![NEXT_SEQUENCE_KEY, next.to_string()],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reel_core::task::{GenerationMode, TaskDraft};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn task(seq: u64) -> GenerationTask {
        GenerationTask::from_draft(TaskDraft::new(GenerationMode::TextToVideo, "gulls"), seq, t0())
            .unwrap()
    }

    #[test]
    fn fresh_store_defaults() {
        let store = SqliteLedgerStore::new(Database::in_memory().unwrap());
        let snap = store.load().unwrap();
        assert!(snap.tasks.is_empty());
        assert_eq!(snap.usage, UsageCounters::default());
        assert_eq!(snap.next_sequence, 1);
    }

    #[test]
    fn sequence_survives_deletion() {
        let store = SqliteLedgerStore::new(Database::in_memory().unwrap());
        let first = task(1);
        let second = task(2);
        store.save_task(&first).unwrap();
        store.save_task(&second).unwrap();
        store.set_next_sequence(3).unwrap();
        assert!(store.delete_task(&second.id).unwrap());

        let snap = store.load().unwrap();
        assert_eq!(snap.tasks.len(), 1);
        assert_eq!(snap.next_sequence, 3);
    }

    #[test]
    fn sequence_falls_back_to_max_plus_one() {
        let store = SqliteLedgerStore::new(Database::in_memory().unwrap());
        store.save_task(&task(7)).unwrap();
        assert_eq!(store.load().unwrap().next_sequence, 8);

        store
            .database()
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO ledger_meta (key, value) VALUES (?1, 'many')",
                    [NEXT_SEQUENCE_KEY],
                )?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.load().unwrap().next_sequence, 8);
    }

    #[test]
    fn unreadable_meta_table_is_an_error() {
        let store = SqliteLedgerStore::new(Database::in_memory().unwrap());
        store.save_task(&task(1)).unwrap();
        store
            .database()
            .with_conn(|conn| {
                conn.execute_batch("DROP TABLE ledger_meta")?;
                Ok(())
            })
            .unwrap();
        assert!(matches!(store.load(), Err(StoreError::Database(_))));
    }

    #[test]
    fn reopen_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reel.db");
        let t = task(1);
        {
            let store = SqliteLedgerStore::new(Database::open(&path).unwrap());
            store.save_task(&t).unwrap();
            store.set_next_sequence(2).unwrap();
            store.record_usage(UsageKind::ApiCall, t0()).unwrap();
        }
        let snap = SqliteLedgerStore::new(Database::open(&path).unwrap())
            .load()
            .unwrap();
        assert_eq!(snap.tasks, vec![t]);
        assert_eq!(snap.next_sequence, 2);
        assert_eq!(snap.usage.total(UsageKind::ApiCall), 1);
    }
}
