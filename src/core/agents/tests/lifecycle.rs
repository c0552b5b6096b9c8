use std::time::Duration;

use super::{FakeDriver, harness, harness_with, init_project_repo, wait_for};
use crate::core::agents::{AgentSpawnRequest, KillReason};
use crate::core::error::EngineError;
use crate::core::store::types::{AgentKind, AgentStatus, LogStream, TaskStatus};

fn deployer_request() -> AgentSpawnRequest {
    AgentSpawnRequest {
        task_id: "t1".into(),
        repo: "svc-a".into(),
        title: "deploy".into(),
        kind: AgentKind::Deployer,
        ..Default::default()
    }
}

#[tokio::test]
async fn spawn_returns_running_agent() {
    let h = harness().await;
    let agent = h.lifecycle.spawn(deployer_request()).await.unwrap();

    assert!(agent.id.starts_with("deployer-"));
    assert_eq!(agent.status, AgentStatus::Running);
    assert_eq!(
        agent.sandbox_id.as_deref(),
        Some(FakeDriver::handle_for(&agent.id).as_str())
    );
    assert!(h.lifecycle.is_tracked(&agent.id).await);

    let task = h.store.get_task("t1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.assigned_agent_id.as_deref(), Some(agent.id.as_str()));
}

#[tokio::test]
async fn spawn_writes_prompt_and_env() {
    let h = harness().await;
    let request = AgentSpawnRequest {
        prompt: Some("do the deploy".into()),
        ..deployer_request()
    };
    let agent = h.lifecycle.spawn(request).await.unwrap();

    let specs = h.driver.launched_specs();
    assert_eq!(specs.len(), 1);
    let spec = &specs[0];
    assert_eq!(spec.name, agent.id);
    assert_eq!(spec.memory_limit_mb, 2048);

    let prompt = std::fs::read_to_string(spec.workspace.join("task-prompt.md")).unwrap();
    assert_eq!(prompt, "do the deploy");

    let env: std::collections::HashMap<_, _> = spec.env.iter().cloned().collect();
    assert_eq!(env.get("TASK_ID").map(String::as_str), Some("t1"));
    assert_eq!(env.get("AGENT_ID").map(String::as_str), Some(agent.id.as_str()));
    assert!(env.contains_key("VIBE_SUITE_URL"));
}

#[tokio::test]
async fn spawn_for_unknown_task_is_not_found() {
    let h = harness().await;
    let request = AgentSpawnRequest {
        task_id: "t-missing".into(),
        ..deployer_request()
    };
    let err = h.lifecycle.spawn(request).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn missing_image_fails_spawn_and_requeues_task() {
    let h = harness().await;
    h.driver.set_image_ok(false);
    let request = AgentSpawnRequest {
        kind: AgentKind::Triage,
        ..deployer_request()
    };
    let err = h.lifecycle.spawn(request).await.unwrap_err();
    assert!(matches!(err, EngineError::Sandbox(_)));

    // The agent row records the failure; the task went back to queued.
    let agents = h.store.list_agents(10).await.unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].status, AgentStatus::Failed);
    assert_eq!(
        h.store.get_task("t1").await.unwrap().status,
        TaskStatus::Queued
    );
    assert_eq!(h.driver.launch_count(), 0);
}

#[tokio::test]
async fn zero_exit_completes_and_purges_workspace() {
    let h = harness().await;
    let agent = h.lifecycle.spawn(deployer_request()).await.unwrap();
    let workspace = h.driver.launched_specs()[0].workspace.clone();

    h.driver.exit(&agent.id, 0);
    let store = h.store.clone();
    let id = agent.id.clone();
    wait_for("agent completion", || {
        let store = store.clone();
        let id = id.clone();
        async move {
            store
                .get_agent(&id)
                .await
                .map(|a| a.status == AgentStatus::Completed)
                .unwrap_or(false)
        }
    })
    .await;

    let finished = h.store.get_agent(&agent.id).await.unwrap();
    assert!(finished.completed_at.is_some());
    assert_eq!(finished.exit_code, Some(0));
    assert!(!h.lifecycle.is_tracked(&agent.id).await);
    assert!(!workspace.exists());
}

#[tokio::test]
async fn nonzero_exit_fails_agent_and_task() {
    let h = harness().await;
    let agent = h.lifecycle.spawn(deployer_request()).await.unwrap();
    let workspace = h.driver.launched_specs()[0].workspace.clone();

    h.driver.exit(&agent.id, 3);
    let store = h.store.clone();
    let id = agent.id.clone();
    wait_for("agent failure", || {
        let store = store.clone();
        let id = id.clone();
        async move {
            store
                .get_agent(&id)
                .await
                .map(|a| a.status == AgentStatus::Failed)
                .unwrap_or(false)
        }
    })
    .await;

    let finished = h.store.get_agent(&agent.id).await.unwrap();
    assert_eq!(finished.exit_code, Some(3));
    assert!(finished.error.as_deref().unwrap_or("").contains("code 3"));
    assert_eq!(
        h.store.get_task("t1").await.unwrap().status,
        TaskStatus::Failed
    );
    // Failed workspaces stay on disk for inspection.
    assert!(workspace.exists());
}

#[tokio::test]
async fn kill_is_idempotent_and_reaches_driver_once() {
    let h = harness().await;
    let agent = h.lifecycle.spawn(deployer_request()).await.unwrap();

    h.lifecycle.kill(&agent.id, KillReason::Killed).await.unwrap();
    let killed = h.store.get_agent(&agent.id).await.unwrap();
    assert_eq!(killed.status, AgentStatus::Killed);
    assert!(killed.completed_at.is_some());
    assert_eq!(h.driver.kill_count(), 1);

    // Second kill is a no-op.
    h.lifecycle.kill(&agent.id, KillReason::Killed).await.unwrap();
    assert_eq!(h.driver.kill_count(), 1);

    // Unknown agents are a no-op too.
    h.lifecycle.kill("coding-nope", KillReason::Killed).await.unwrap();

    // The sandbox exits after the kill; status stays killed.
    let store = h.store.clone();
    let lifecycle = h.lifecycle.clone();
    let id = agent.id.clone();
    wait_for("tracking cleared", || {
        let lifecycle = lifecycle.clone();
        let id = id.clone();
        async move { !lifecycle.is_tracked(&id).await }
    })
    .await;
    assert_eq!(
        store.get_agent(&agent.id).await.unwrap().status,
        AgentStatus::Killed
    );
}

#[tokio::test]
async fn watchdog_times_out_agent() {
    let h = harness_with(|cfg| {
        cfg.deployer_timeout = Duration::from_millis(50);
    })
    .await;
    let agent = h.lifecycle.spawn(deployer_request()).await.unwrap();

    let store = h.store.clone();
    let id = agent.id.clone();
    wait_for("timeout status", || {
        let store = store.clone();
        let id = id.clone();
        async move {
            store
                .get_agent(&id)
                .await
                .map(|a| a.status == AgentStatus::Timeout)
                .unwrap_or(false)
        }
    })
    .await;

    let timed_out = h.store.get_agent(&agent.id).await.unwrap();
    assert!(timed_out.completed_at.is_some());
    assert_eq!(h.driver.kill_count(), 1);
    assert_eq!(
        h.store.get_task("t1").await.unwrap().status,
        TaskStatus::Failed
    );

    let lifecycle = h.lifecycle.clone();
    let id = agent.id.clone();
    wait_for("tracking cleared", || {
        let lifecycle = lifecycle.clone();
        let id = id.clone();
        async move { !lifecycle.is_tracked(&id).await }
    })
    .await;
}

#[tokio::test]
async fn log_chunks_become_ordered_lines() {
    let h = harness().await;
    let agent = h.lifecycle.spawn(deployer_request()).await.unwrap();

    h.driver.emit(&agent.id, LogStream::Out, "one\ntwo\n").await;
    h.driver.emit(&agent.id, LogStream::Err, "oops\n").await;

    let lifecycle = h.lifecycle.clone();
    let id = agent.id.clone();
    wait_for("log lines", || {
        let lifecycle = lifecycle.clone();
        let id = id.clone();
        async move { lifecycle.get_logs(&id).await.map(|l| l.len() == 3).unwrap_or(false) }
    })
    .await;

    let lines = h.lifecycle.get_logs(&agent.id).await.unwrap();
    assert_eq!(lines[0].content, "one");
    assert_eq!(lines[0].stream, LogStream::Out);
    assert_eq!(lines[2].content, "oops");
    assert_eq!(lines[2].stream, LogStream::Err);
}

#[tokio::test]
async fn retry_spawns_fresh_agent_for_same_task() {
    let h = harness().await;
    let first = h.lifecycle.spawn(deployer_request()).await.unwrap();
    h.driver.exit(&first.id, 1);

    let store = h.store.clone();
    let id = first.id.clone();
    wait_for("first agent failed", || {
        let store = store.clone();
        let id = id.clone();
        async move {
            store
                .get_agent(&id)
                .await
                .map(|a| a.status.is_terminal())
                .unwrap_or(false)
        }
    })
    .await;

    let second = h.lifecycle.retry(&first.id).await.unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.kind, AgentKind::Deployer);
    assert_eq!(second.task_id, "t1");
    assert_eq!(h.driver.launch_count(), 2);
}

#[tokio::test]
async fn retry_of_unknown_agent_is_not_found() {
    let h = harness().await;
    let err = h.lifecycle.retry("coding-nope").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn coding_agent_clones_and_branches() {
    let h = harness().await;
    init_project_repo(&h.lifecycle_projects_dir(), "svc-a");

    let request = AgentSpawnRequest {
        kind: AgentKind::Coding,
        ..deployer_request()
    };
    let agent = h.lifecycle.spawn(request).await.unwrap();

    let repo_dir = h.driver.launched_specs()[0].workspace.join("repo");
    assert!(repo_dir.join("README.md").exists());

    let head = std::process::Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(&repo_dir)
        .output()
        .unwrap();
    let branch = String::from_utf8_lossy(&head.stdout).trim().to_string();
    assert_eq!(branch, format!("agent/{}", agent.id));
}

#[tokio::test]
async fn active_listing_tracks_only_live_agents() {
    let h = harness().await;
    let a = h.lifecycle.spawn(deployer_request()).await.unwrap();
    let active = h.lifecycle.get_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, a.id);

    h.driver.exit(&a.id, 0);
    let lifecycle = h.lifecycle.clone();
    wait_for("active empty", || {
        let lifecycle = lifecycle.clone();
        async move { lifecycle.get_active().await.map(|v| v.is_empty()).unwrap_or(false) }
    })
    .await;

    let analytics = h.lifecycle.analytics().await.unwrap();
    assert_eq!(analytics.completed, 1);
    assert_eq!(analytics.active(), 0);
}

impl super::Harness {
    fn lifecycle_projects_dir(&self) -> std::path::PathBuf {
        self.tempdir.path().join("projects")
    }
}

/// Capture server for outbound engine HTTP: records JSON bodies posted to
/// any path.
async fn capture_server() -> (String, tokio::sync::mpsc::Receiver<(String, serde_json::Value)>) {
    use axum::extract::Path;
    let (tx, rx) = tokio::sync::mpsc::channel::<(String, serde_json::Value)>(8);
    let app = axum::Router::new().route(
        "/{*path}",
        axum::routing::post(
            move |Path(path): Path<String>, axum::Json(body): axum::Json<serde_json::Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send((path, body)).await;
                    axum::Json(serde_json::json!({"ok": true}))
                }
            },
        ),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{}", addr), rx)
}

#[tokio::test]
async fn completion_callback_is_posted() {
    let (base, mut rx) = capture_server().await;
    let h = harness().await;

    let request = AgentSpawnRequest {
        callback_url: Some(format!("{}/hooks/agent-done", base)),
        ..deployer_request()
    };
    let agent = h.lifecycle.spawn(request).await.unwrap();
    h.driver.exit(&agent.id, 0);

    let (path, body) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("callback within deadline")
        .unwrap();
    assert_eq!(path, "hooks/agent-done");
    assert_eq!(body["agentId"], agent.id.as_str());
    assert_eq!(body["taskId"], "t1");
    assert_eq!(body["status"], "completed");
    assert_eq!(body["exitCode"], 0);
    assert!(body["completedAt"].is_string());
}

#[tokio::test]
async fn final_result_block_is_posted_as_comment() {
    let (base, mut rx) = capture_server().await;
    let h = harness_with(|cfg| cfg.suite_url = base.clone()).await;

    let agent = h.lifecycle.spawn(deployer_request()).await.unwrap();
    h.driver
        .emit(
            &agent.id,
            LogStream::Out,
            "deploying...\n{\"type\":\"result\",\"result\":\"rolled out v12\"}\n",
        )
        .await;

    // Make sure the lines are ingested before the sandbox exits.
    let lifecycle = h.lifecycle.clone();
    let id = agent.id.clone();
    wait_for("log lines ingested", || {
        let lifecycle = lifecycle.clone();
        let id = id.clone();
        async move {
            lifecycle
                .get_logs(&id)
                .await
                .map(|l| l.len() == 2)
                .unwrap_or(false)
        }
    })
    .await;
    h.driver.exit(&agent.id, 0);

    let (path, body) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("comment within deadline")
        .unwrap();
    assert_eq!(path, "api/tasks/t1/comments");
    assert_eq!(body["content"], "rolled out v12");
}
