use tracing::{instrument, warn};

use reel_core::ids::TaskId;
use reel_core::task::{GenerationTask, TaskPayload};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const TABLE: &str = "tasks";

const SELECT_COLUMNS: &str = "SELECT id, sequence_number, mode, status, prompt, reference, model, format,
        progress, progress_message, artifact_url, thumbnail, attempt, created_at
 FROM tasks";

/// Persistence for task records. Whole-row writes keyed by id.
pub struct TaskRepo {
    db: Database,
}

impl TaskRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the full record.
    #[instrument(skip(self, task), fields(task_id = %task.id, status = %task.status))]
    pub fn upsert(&self, task: &GenerationTask) -> Result<(), StoreError> {
        let reference = task
            .payload
            .reference
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let format = serde_json::to_string(&task.format)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, sequence_number, mode, status, prompt, reference, model, format,
                                    progress, progress_message, artifact_url, thumbnail, attempt, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    progress = excluded.progress,
                    progress_message = excluded.progress_message,
                    artifact_url = excluded.artifact_url,
                    thumbnail = excluded.thumbnail,
                    attempt = excluded.attempt",
                rusqlite::params![
                    task.id.as_str(),
                    task.sequence_number as i64,
                    task.mode.as_str(),
                    task.status.to_string(),
                    task.payload.prompt,
                    reference,
                    task.model,
                    format,
                    task.progress as i64,
                    task.progress_message,
                    task.artifact_url,
                    task.thumbnail,
                    task.attempt as i64,
                    task.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Returns whether a row was removed.
    #[instrument(skip(self), fields(task_id = %id))]
    pub fn delete(&self, id: &TaskId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute("DELETE FROM tasks WHERE id = ?1", [id.as_str()])?;
            Ok(n > 0)
        })
    }

    #[instrument(skip(self), fields(task_id = %id))]
    pub fn get(&self, id: &TaskId) -> Result<GenerationTask, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_task(row),
                None => Err(StoreError::NotFound(format!("task {id}"))),
            }
        })
    }

    /// All readable tasks, newest first. Rows that fail to decode are
    /// skipped with a warning.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<GenerationTask>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} ORDER BY sequence_number DESC, created_at DESC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut tasks = Vec::new();
            while let Some(row) = rows.next()? {
                match row_to_task(row) {
                    Ok(task) => tasks.push(task),
                    Err(e) => warn!(error = %e, "skipping unreadable task row"),
                }
            }
            Ok(tasks)
        })
    }

    pub fn max_sequence(&self) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let max: Option<i64> =
                conn.query_row("SELECT MAX(sequence_number) FROM tasks", [], |r| r.get(0))?;
            Ok(max.unwrap_or(0).max(0) as u64)
        })
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> Result<GenerationTask, StoreError> {
    let id: String = row_helpers::get(row, 0, TABLE, "id")?;
    let sequence: i64 = row_helpers::get(row, 1, TABLE, "sequence_number")?;
    let mode: String = row_helpers::get(row, 2, TABLE, "mode")?;
    let status: String = row_helpers::get(row, 3, TABLE, "status")?;
    let prompt: String = row_helpers::get(row, 4, TABLE, "prompt")?;
    let reference: Option<String> = row_helpers::get_opt(row, 5, TABLE, "reference")?;
    let format: String = row_helpers::get(row, 7, TABLE, "format")?;
    let progress: i64 = row_helpers::get(row, 8, TABLE, "progress")?;
    let attempt: i64 = row_helpers::get(row, 12, TABLE, "attempt")?;
    let created_at: String = row_helpers::get(row, 13, TABLE, "created_at")?;

    Ok(GenerationTask {
        id: TaskId::from_raw(id),
        sequence_number: u64::try_from(sequence).map_err(|_| StoreError::CorruptRow {
            table: TABLE,
            column: "sequence_number",
            detail: format!("negative sequence {sequence}"),
        })?,
        mode: row_helpers::parse_enum(&mode, TABLE, "mode")?,
        status: row_helpers::parse_enum(&status, TABLE, "status")?,
        payload: TaskPayload {
            prompt,
            reference: reference
                .map(|raw| row_helpers::parse_json(&raw, TABLE, "reference"))
                .transpose()?,
        },
        model: row_helpers::get(row, 6, TABLE, "model")?,
        format: row_helpers::parse_json(&format, TABLE, "format")?,
        progress: progress.clamp(0, 100) as u8,
        progress_message: row_helpers::get_opt(row, 9, TABLE, "progress_message")?,
        artifact_url: row_helpers::get_opt(row, 10, TABLE, "artifact_url")?,
        thumbnail: row_helpers::get_opt(row, 11, TABLE, "thumbnail")?,
        attempt: attempt.clamp(0, u32::MAX as i64) as u32,
        created_at: row_helpers::parse_timestamp(&created_at, TABLE, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use reel_core::task::{
        ClipLength, GenerationMode, Orientation, Reference, TaskDraft, TaskStatus, TaskUpdate,
        VideoFormat,
    };

    fn repo() -> TaskRepo {
        TaskRepo::new(Database::in_memory().unwrap())
    }

    fn task(seq: u64) -> GenerationTask {
        let draft = TaskDraft::new(GenerationMode::ImageToVideo, "drift")
            .reference(Reference::Image("data:image/png;base64,AAAA".into()))
            .format(VideoFormat {
                orientation: Orientation::Portrait,
                length: ClipLength::Fifteen,
            });
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        GenerationTask::from_draft(draft, seq, at).unwrap()
    }

    #[test]
    fn upsert_then_get() {
        let repo = repo();
        let t = task(1);
        repo.upsert(&t).unwrap();
        assert_eq!(repo.get(&t.id).unwrap(), t);
    }

    #[test]
    fn upsert_updates_mutable_fields() {
        let repo = repo();
        let mut t = task(1);
        repo.upsert(&t).unwrap();

        t.apply(&TaskUpdate::started()).unwrap();
        t.apply(&TaskUpdate::completed("https://cdn/v.mp4")).unwrap();
        repo.upsert(&t).unwrap();

        let loaded = repo.get(&t.id).unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(loaded.artifact_url.as_deref(), Some("https://cdn/v.mp4"));
        assert_eq!(loaded.attempt, 1);
        assert_eq!(loaded.progress, 100);
    }

    #[test]
    fn list_is_newest_first() {
        let repo = repo();
        for seq in [1, 3, 2] {
            repo.upsert(&task(seq)).unwrap();
        }
        let seqs: Vec<u64> = repo.list().unwrap().iter().map(|t| t.sequence_number).collect();
        assert_eq!(seqs, vec![3, 2, 1]);
        assert_eq!(repo.max_sequence().unwrap(), 3);
    }

    #[test]
    fn corrupt_rows_are_skipped() {
        let db = Database::in_memory().unwrap();
        let repo = TaskRepo::new(db.clone());
        repo.upsert(&task(1)).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, sequence_number, mode, status, prompt, model, format, created_at)
                 VALUES ('task_bad', 2, 'interpretive-dance', 'pending', 'p', 'm', '{}', 'now')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let tasks = repo.list().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].sequence_number, 1);
        assert!(matches!(
            repo.get(&TaskId::from_raw("task_bad")),
            Err(StoreError::CorruptRow { column: "mode", .. })
        ));
    }

    #[test]
    fn delete_reports_presence() {
        let repo = repo();
        let t = task(1);
        repo.upsert(&t).unwrap();
        assert!(repo.delete(&t.id).unwrap());
        assert!(!repo.delete(&t.id).unwrap());
        assert!(matches!(repo.get(&t.id), Err(StoreError::NotFound(_))));
        assert_eq!(repo.max_sequence().unwrap(), 0);
    }
}
