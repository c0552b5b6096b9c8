mod queue;

use chrono::Utc;

use crate::core::store::Store;
use crate::core::store::types::{AgentKind, AgentRecord, AgentStatus, TaskRecord, TaskStatus};

pub(crate) fn sample_task(id: &str) -> TaskRecord {
    TaskRecord {
        id: id.to_string(),
        title: format!("task {}", id),
        description: "do the thing".to_string(),
        kind: "feature".to_string(),
        status: TaskStatus::Queued,
        repo: Some("svc-a".to_string()),
        repos: Vec::new(),
        investigation_only: false,
        execution_plan: None,
        assigned_agent_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub(crate) fn sample_agent(id: &str, task_id: &str, status: AgentStatus) -> AgentRecord {
    AgentRecord {
        id: id.to_string(),
        task_id: task_id.to_string(),
        sandbox_id: None,
        kind: AgentKind::Coding,
        status,
        started_at: Utc::now(),
        completed_at: None,
        exit_code: None,
        error: None,
        metadata: serde_json::json!({}),
    }
}

pub(crate) fn open_store() -> Store {
    Store::open_in_memory().expect("in-memory store")
}

#[tokio::test]
async fn open_creates_schema_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("engine.db")).unwrap();
    store.service_log("info", "boot").await.unwrap();
    let logs = store.list_service_logs(10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "boot");
}

#[tokio::test]
async fn reopen_preserves_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.db");
    {
        let store = Store::open(&path).unwrap();
        store.insert_task(&sample_task("t1")).await.unwrap();
    }
    let store = Store::open(&path).unwrap();
    let task = store.get_task("t1").await.unwrap();
    assert_eq!(task.title, "task t1");
}
