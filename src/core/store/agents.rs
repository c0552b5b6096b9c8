use chrono::Utc;
use rusqlite::{Row, params};

use super::{Store, parse_ts, parse_ts_opt};
use crate::core::error::{EngineError, EngineResult};
use crate::core::store::types::{
    AgentAnalytics, AgentKind, AgentLogLine, AgentRecord, AgentStatus, LogStream, NewLogLine,
};

fn agent_from_row(row: &Row<'_>) -> Result<AgentRecord, rusqlite::Error> {
    let kind_raw: String = row.get(3)?;
    let status_raw: String = row.get(4)?;
    let metadata_raw: String = row.get(9)?;
    Ok(AgentRecord {
        id: row.get(0)?,
        task_id: row.get(1)?,
        sandbox_id: row.get(2)?,
        kind: AgentKind::from_str(&kind_raw).unwrap_or_default(),
        status: AgentStatus::from_str(&status_raw).unwrap_or(AgentStatus::Failed),
        started_at: parse_ts(row.get::<_, String>(5)?),
        completed_at: parse_ts_opt(row.get::<_, Option<String>>(6)?),
        exit_code: row.get(7)?,
        error: row.get(8)?,
        metadata: serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null),
    })
}

const AGENT_COLS: &str =
    "id, task_id, sandbox_id, kind, status, started_at, completed_at, exit_code, error, metadata";

impl Store {
    pub async fn insert_agent(&self, agent: &AgentRecord) -> EngineResult<()> {
        let metadata = agent.metadata.to_string();
        let started_at = agent.started_at.to_rfc3339();
        let agent = agent.clone();
        self.with_conn(move |db| {
            db.execute(
                "INSERT INTO agents (id, task_id, sandbox_id, kind, status, started_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    agent.id,
                    agent.task_id,
                    agent.sandbox_id,
                    agent.kind.as_str(),
                    agent.status.as_str(),
                    started_at,
                    metadata,
                ],
            )
            .map(|_| ())
        })
        .await
    }

    pub async fn get_agent(&self, id: &str) -> EngineResult<AgentRecord> {
        let id = id.to_string();
        let found = self
            .with_conn(move |db| {
                let mut stmt =
                    db.prepare(&format!("SELECT {} FROM agents WHERE id = ?1", AGENT_COLS))?;
                let mut rows = stmt.query_map(params![id], agent_from_row)?;
                rows.next().transpose()
            })
            .await?;
        found.ok_or_else(|| EngineError::NotFound("agent".into()))
    }

    pub async fn list_agents(&self, limit: usize) -> EngineResult<Vec<AgentRecord>> {
        self.with_conn(move |db| {
            let mut stmt = db.prepare(&format!(
                "SELECT {} FROM agents ORDER BY started_at DESC LIMIT ?1",
                AGENT_COLS
            ))?;
            let rows = stmt.query_map(params![limit as i64], agent_from_row)?;
            rows.collect()
        })
        .await
    }

    pub async fn list_agents_by_status(&self, status: AgentStatus) -> EngineResult<Vec<AgentRecord>> {
        self.with_conn(move |db| {
            let mut stmt = db.prepare(&format!(
                "SELECT {} FROM agents WHERE status = ?1 ORDER BY started_at ASC",
                AGENT_COLS
            ))?;
            let rows = stmt.query_map(params![status.as_str()], agent_from_row)?;
            rows.collect()
        })
        .await
    }

    pub async fn count_running_agents(&self) -> EngineResult<i64> {
        self.with_conn(|db| {
            db.query_row(
                "SELECT COUNT(*) FROM agents WHERE status IN ('starting', 'running')",
                [],
                |row| row.get(0),
            )
        })
        .await
    }

    /// Record the sandbox handle and flip the agent to running.
    pub async fn mark_agent_running(&self, id: &str, sandbox_id: &str) -> EngineResult<()> {
        let id = id.to_string();
        let sandbox_id = sandbox_id.to_string();
        self.with_conn(move |db| {
            db.execute(
                "UPDATE agents SET sandbox_id = ?2, status = 'running' WHERE id = ?1",
                params![id, sandbox_id],
            )
            .map(|_| ())
        })
        .await
    }

    /// Move an agent to a terminal status, stamping `completed_at`.
    pub async fn finish_agent(
        &self,
        id: &str,
        status: AgentStatus,
        exit_code: Option<i64>,
        error: Option<&str>,
    ) -> EngineResult<()> {
        debug_assert!(status.is_terminal());
        let id = id.to_string();
        let error = error.map(str::to_string);
        let completed_at = Utc::now().to_rfc3339();
        self.with_conn(move |db| {
            db.execute(
                "UPDATE agents SET status = ?2, completed_at = ?3, exit_code = ?4,
                        error = COALESCE(?5, error)
                 WHERE id = ?1",
                params![id, status.as_str(), completed_at, exit_code, error],
            )
            .map(|_| ())
        })
        .await
    }

    /// Append a batch of log lines in one transaction. Insertion order within
    /// the batch is preserved, so readers see observation order.
    pub async fn append_log_lines(&self, lines: Vec<NewLogLine>) -> EngineResult<()> {
        if lines.is_empty() {
            return Ok(());
        }
        self.with_conn(move |db| {
            let tx = db.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO agent_logs (agent_id, timestamp, stream, content)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for line in &lines {
                    stmt.execute(params![
                        line.agent_id,
                        line.timestamp.to_rfc3339(),
                        line.stream.as_str(),
                        line.content,
                    ])?;
                }
            }
            tx.commit()
        })
        .await
    }

    pub async fn get_agent_logs(&self, agent_id: &str) -> EngineResult<Vec<AgentLogLine>> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |db| {
            let mut stmt = db.prepare(
                "SELECT id, agent_id, timestamp, stream, content FROM agent_logs
                 WHERE agent_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![agent_id], |row| {
                let stream_raw: String = row.get(3)?;
                Ok(AgentLogLine {
                    id: row.get(0)?,
                    agent_id: row.get(1)?,
                    timestamp: parse_ts(row.get::<_, String>(2)?),
                    stream: LogStream::from_str(&stream_raw).unwrap_or(LogStream::Combined),
                    content: row.get(4)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    /// Full log text for an agent, newline-joined in append order.
    pub async fn collect_agent_log_text(&self, agent_id: &str) -> EngineResult<String> {
        let lines = self.get_agent_logs(agent_id).await?;
        Ok(lines
            .into_iter()
            .map(|l| l.content)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    pub async fn agent_analytics(&self) -> EngineResult<AgentAnalytics> {
        self.with_conn(|db| {
            let mut stmt = db.prepare("SELECT status, COUNT(*) FROM agents GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            let mut analytics = AgentAnalytics::default();
            for row in rows {
                let (status, count) = row?;
                analytics.total += count;
                match AgentStatus::from_str(&status) {
                    Some(AgentStatus::Starting) => analytics.starting = count,
                    Some(AgentStatus::Running) => analytics.running = count,
                    Some(AgentStatus::Completed) => analytics.completed = count,
                    Some(AgentStatus::Failed) => analytics.failed = count,
                    Some(AgentStatus::Timeout) => analytics.timeout = count,
                    Some(AgentStatus::Killed) => analytics.killed = count,
                    None => {}
                }
            }
            Ok(analytics)
        })
        .await
    }
}
