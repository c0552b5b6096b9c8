use chrono::Utc;
use rusqlite::{Row, params};

use super::{Store, parse_ts};
use crate::core::error::{EngineError, EngineResult};
use crate::core::store::types::{TaskRecord, TaskStatus};

fn task_from_row(row: &Row<'_>) -> Result<TaskRecord, rusqlite::Error> {
    let status_raw: String = row.get(4)?;
    let repos_raw: String = row.get(6)?;
    let plan_raw: Option<String> = row.get(8)?;
    Ok(TaskRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        kind: row.get(3)?,
        status: TaskStatus::from_str(&status_raw).unwrap_or(TaskStatus::Pending),
        repo: row.get(5)?,
        repos: serde_json::from_str(&repos_raw).unwrap_or_default(),
        investigation_only: row.get::<_, i64>(7)? != 0,
        execution_plan: plan_raw.and_then(|p| serde_json::from_str(&p).ok()),
        assigned_agent_id: row.get(9)?,
        created_at: parse_ts(row.get::<_, String>(10)?),
        updated_at: parse_ts(row.get::<_, String>(11)?),
    })
}

const TASK_COLS: &str = "id, title, description, kind, status, repo, repos, investigation_only, \
                         execution_plan, assigned_agent_id, created_at, updated_at";

impl Store {
    pub async fn insert_task(&self, task: &TaskRecord) -> EngineResult<()> {
        let task = task.clone();
        let repos = serde_json::to_string(&task.repos).unwrap_or_else(|_| "[]".into());
        let plan = task.execution_plan.as_ref().map(|p| p.to_string());
        self.with_conn(move |db| {
            db.execute(
                "INSERT INTO tasks (id, title, description, kind, status, repo, repos,
                        investigation_only, execution_plan, assigned_agent_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    task.id,
                    task.title,
                    task.description,
                    task.kind,
                    task.status.as_str(),
                    task.repo,
                    repos,
                    task.investigation_only as i64,
                    plan,
                    task.assigned_agent_id,
                    task.created_at.to_rfc3339(),
                    task.updated_at.to_rfc3339(),
                ],
            )
            .map(|_| ())
        })
        .await
    }

    pub async fn get_task(&self, id: &str) -> EngineResult<TaskRecord> {
        let id = id.to_string();
        let found = self
            .with_conn(move |db| {
                let mut stmt =
                    db.prepare(&format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLS))?;
                let mut rows = stmt.query_map(params![id], task_from_row)?;
                rows.next().transpose()
            })
            .await?;
        found.ok_or_else(|| EngineError::NotFound("task".into()))
    }

    pub async fn task_exists(&self, id: &str) -> EngineResult<bool> {
        let id = id.to_string();
        self.with_conn(move |db| {
            db.query_row("SELECT COUNT(*) FROM tasks WHERE id = ?1", params![id], |r| {
                r.get::<_, i64>(0)
            })
            .map(|n| n > 0)
        })
        .await
    }

    pub async fn list_tasks(&self, limit: usize) -> EngineResult<Vec<TaskRecord>> {
        self.with_conn(move |db| {
            let mut stmt = db.prepare(&format!(
                "SELECT {} FROM tasks ORDER BY created_at DESC LIMIT ?1",
                TASK_COLS
            ))?;
            let rows = stmt.query_map(params![limit as i64], task_from_row)?;
            rows.collect()
        })
        .await
    }

    pub async fn update_task_status(&self, id: &str, status: TaskStatus) -> EngineResult<()> {
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();
        // Leaving assigned/in_progress clears the agent binding.
        let clear_agent = !matches!(status, TaskStatus::Assigned | TaskStatus::InProgress);
        self.with_conn(move |db| {
            if clear_agent {
                db.execute(
                    "UPDATE tasks SET status = ?2, assigned_agent_id = NULL, updated_at = ?3
                     WHERE id = ?1",
                    params![id, status.as_str(), now],
                )
            } else {
                db.execute(
                    "UPDATE tasks SET status = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id, status.as_str(), now],
                )
            }
            .map(|_| ())
        })
        .await
    }

    /// Bind an agent to a task and mark it assigned.
    pub async fn assign_task(&self, id: &str, agent_id: &str) -> EngineResult<()> {
        let id = id.to_string();
        let agent_id = agent_id.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |db| {
            db.execute(
                "UPDATE tasks SET status = 'assigned', assigned_agent_id = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![id, agent_id, now],
            )
            .map(|_| ())
        })
        .await
    }

    pub async fn set_task_plan(&self, id: &str, plan: &serde_json::Value) -> EngineResult<()> {
        let id = id.to_string();
        let plan = plan.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |db| {
            db.execute(
                "UPDATE tasks SET execution_plan = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, plan, now],
            )
            .map(|_| ())
        })
        .await
    }
}
