mod agents;
mod queue;
mod tasks;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rusqlite::params;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::error::{EngineError, EngineResult};
use types::ServiceLogLine;

/// Durable, single-writer persistence for agents, tasks, the queue, and
/// service logs. All components share one handle; writes serialize on the
/// connection mutex, which is the engine's single linearization point.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path`, apply pragmas, and create the
    /// schema.
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Store(format!("create db dir: {}", e)))?;
        }
        let db = Connection::open(path.as_ref())?;
        db.pragma_update(None, "journal_mode", "WAL")?;
        db.pragma_update(None, "foreign_keys", "ON")?;
        Self::create_schema(&db)?;
        info!("store open at {}", path.as_ref().display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> EngineResult<Self> {
        let db = Connection::open_in_memory()?;
        db.pragma_update(None, "foreign_keys", "ON")?;
        Self::create_schema(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    fn create_schema(db: &Connection) -> EngineResult<()> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                sandbox_id TEXT,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                exit_code INTEGER,
                error TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status);
            CREATE INDEX IF NOT EXISTS idx_agents_task ON agents(task_id);

            CREATE TABLE IF NOT EXISTS agent_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                timestamp TEXT NOT NULL,
                stream TEXT NOT NULL,
                content TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_agent_logs_agent ON agent_logs(agent_id);

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                kind TEXT NOT NULL DEFAULT 'feature',
                status TEXT NOT NULL DEFAULT 'pending',
                repo TEXT,
                repos TEXT NOT NULL DEFAULT '[]',
                investigation_only INTEGER NOT NULL DEFAULT 0,
                execution_plan TEXT,
                assigned_agent_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

            CREATE TABLE IF NOT EXISTS queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL UNIQUE REFERENCES tasks(id),
                position INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                queued_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_queue_status ON queue(status);

            CREATE TABLE IF NOT EXISTS queue_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                level TEXT NOT NULL,
                message TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    pub(crate) async fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, rusqlite::Error>,
    ) -> EngineResult<T> {
        let mut db = self.db.lock().await;
        f(&mut db).map_err(EngineError::from)
    }

    /// Append a row to the service `logs` table.
    pub async fn service_log(&self, level: &str, message: &str) -> EngineResult<()> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|db| {
            db.execute(
                "INSERT INTO logs (timestamp, level, message) VALUES (?1, ?2, ?3)",
                params![now, level, message],
            )
            .map(|_| ())
        })
        .await
    }

    pub async fn list_service_logs(&self, limit: usize) -> EngineResult<Vec<ServiceLogLine>> {
        self.with_conn(|db| {
            let mut stmt = db.prepare(
                "SELECT id, timestamp, level, message FROM logs ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok(ServiceLogLine {
                    id: row.get(0)?,
                    timestamp: parse_ts(row.get::<_, String>(1)?),
                    level: row.get(2)?,
                    message: row.get(3)?,
                })
            })?;
            rows.collect()
        })
        .await
    }
}

pub(crate) fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

pub(crate) fn parse_ts_opt(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.map(parse_ts)
}

#[cfg(test)]
pub(crate) mod tests;
