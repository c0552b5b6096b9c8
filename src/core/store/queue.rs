use chrono::Utc;
use rusqlite::{Row, params};

use super::{Store, parse_ts, parse_ts_opt};
use crate::core::error::{EngineError, EngineResult};
use crate::core::store::types::{QueueEntry, QueueEntryStatus, QueueSettings};

fn entry_from_row(row: &Row<'_>) -> Result<QueueEntry, rusqlite::Error> {
    let status_raw: String = row.get(3)?;
    Ok(QueueEntry {
        id: row.get(0)?,
        task_id: row.get(1)?,
        position: row.get(2)?,
        status: QueueEntryStatus::from_str(&status_raw).unwrap_or(QueueEntryStatus::Queued),
        queued_at: parse_ts(row.get::<_, String>(4)?),
        completed_at: parse_ts_opt(row.get::<_, Option<String>>(5)?),
    })
}

const ENTRY_COLS: &str = "id, task_id, position, status, queued_at, completed_at";

impl Store {
    /// Append a task to the back of the queue. One entry per task.
    pub async fn enqueue_task(&self, task_id: &str) -> EngineResult<QueueEntry> {
        let task_id = task_id.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |db| {
            let next_pos: i64 = db.query_row(
                "SELECT COALESCE(MAX(position), 0) + 1 FROM queue",
                [],
                |r| r.get(0),
            )?;
            db.execute(
                "INSERT INTO queue (task_id, position, status, queued_at)
                 VALUES (?1, ?2, 'queued', ?3)",
                params![task_id, next_pos, now],
            )?;
            let id = db.last_insert_rowid();
            db.query_row(
                &format!("SELECT {} FROM queue WHERE id = ?1", ENTRY_COLS),
                params![id],
                entry_from_row,
            )
        })
        .await
    }

    pub async fn list_queue(&self) -> EngineResult<Vec<QueueEntry>> {
        self.with_conn(|db| {
            let mut stmt = db.prepare(&format!(
                "SELECT {} FROM queue ORDER BY position ASC",
                ENTRY_COLS
            ))?;
            let rows = stmt.query_map([], entry_from_row)?;
            rows.collect()
        })
        .await
    }

    pub async fn get_queue_entry(&self, task_id: &str) -> EngineResult<QueueEntry> {
        let task_id = task_id.to_string();
        let found = self
            .with_conn(move |db| {
                let mut stmt = db.prepare(&format!(
                    "SELECT {} FROM queue WHERE task_id = ?1",
                    ENTRY_COLS
                ))?;
                let mut rows = stmt.query_map(params![task_id], entry_from_row)?;
                rows.next().transpose()
            })
            .await?;
        found.ok_or_else(|| EngineError::NotFound("queue entry".into()))
    }

    /// Lowest-position entries still queued whose joined task is also queued.
    pub async fn get_pending_queue_head(&self, limit: usize) -> EngineResult<Vec<QueueEntry>> {
        self.with_conn(move |db| {
            let mut stmt = db.prepare(
                "SELECT q.id, q.task_id, q.position, q.status, q.queued_at, q.completed_at
                 FROM queue q
                 JOIN tasks t ON t.id = q.task_id
                 WHERE q.status = 'queued' AND t.status = 'queued'
                 ORDER BY q.position ASC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], entry_from_row)?;
            rows.collect()
        })
        .await
    }

    pub async fn count_processing_queue(&self) -> EngineResult<i64> {
        self.with_conn(|db| {
            db.query_row(
                "SELECT COUNT(*) FROM queue WHERE status = 'processing'",
                [],
                |row| row.get(0),
            )
        })
        .await
    }

    /// True when any task with a queue entry is failed. Gates the queue
    /// processor under stop-on-failure; keyed off task status so the gate
    /// lifts only when the failed task itself is resolved.
    pub async fn any_failed_task_in_queue(&self) -> EngineResult<bool> {
        self.with_conn(|db| {
            db.query_row(
                "SELECT COUNT(*) FROM queue q JOIN tasks t ON t.id = q.task_id
                 WHERE t.status = 'failed'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)
        })
        .await
    }

    pub async fn set_queue_entry_status(
        &self,
        task_id: &str,
        status: QueueEntryStatus,
    ) -> EngineResult<()> {
        let task_id = task_id.to_string();
        let completed_at = matches!(
            status,
            QueueEntryStatus::Completed | QueueEntryStatus::Failed
        )
        .then(|| Utc::now().to_rfc3339());
        self.with_conn(move |db| {
            db.execute(
                "UPDATE queue SET status = ?2, completed_at = COALESCE(?3, completed_at)
                 WHERE task_id = ?1",
                params![task_id, status.as_str(), completed_at],
            )
            .map(|_| ())
        })
        .await
    }

    pub async fn delete_queue_entry(&self, task_id: &str) -> EngineResult<bool> {
        let task_id = task_id.to_string();
        self.with_conn(move |db| {
            db.execute("DELETE FROM queue WHERE task_id = ?1", params![task_id])
                .map(|n| n > 0)
        })
        .await
    }

    pub async fn clear_queue(&self) -> EngineResult<usize> {
        self.with_conn(|db| db.execute("DELETE FROM queue", []))
            .await
    }

    pub async fn get_queue_settings(&self) -> EngineResult<QueueSettings> {
        self.with_conn(|db| {
            let mut stmt = db.prepare("SELECT key, value FROM queue_settings")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut settings = QueueSettings::default();
            for row in rows {
                let (key, value) = row?;
                match key.as_str() {
                    "paused" => settings.paused = value == "true",
                    "stop_on_failure" => settings.stop_on_failure = value == "true",
                    "max_concurrent" => {
                        settings.max_concurrent = value.parse().unwrap_or(settings.max_concurrent)
                    }
                    _ => {}
                }
            }
            Ok(settings)
        })
        .await
    }

    pub async fn set_queue_setting(&self, key: &str, value: &str) -> EngineResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |db| {
            db.execute(
                "INSERT INTO queue_settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map(|_| ())
        })
        .await
    }
}
