//! End-to-end API tests over a live engine process. Only flows that stay off
//! the sandbox drivers are exercised here; lifecycle behavior against real
//! sandboxes is covered by the in-crate tests with the fake driver.

#[path = "e2e_harness.rs"]
mod harness;

use harness::EngineHarness;
use serde_json::json;

#[tokio::test]
async fn health_reports_ok_and_counts() {
    let engine = EngineHarness::spawn().await.unwrap();
    let (status, body) = engine.get("/health").await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["activeAgents"], 0);
    assert_eq!(body["queueDepth"], 0);
    assert_eq!(body["pendingEvents"], 0);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn agents_listing_starts_empty() {
    let engine = EngineHarness::spawn().await.unwrap();

    let (status, body) = engine.get("/agents").await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body.as_array().unwrap().len(), 0);

    let (status, body) = engine.get("/agents/analytics").await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body["total"], 0);

    let (status, body) = engine.get("/agents/coding-nope").await.unwrap();
    assert_eq!(status, 404);
    assert_eq!(body["kind"], "not-found");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn spawn_for_unknown_task_returns_structured_error() {
    let engine = EngineHarness::spawn().await.unwrap();
    let (status, body) = engine
        .post(
            "/agents/spawn",
            json!({"taskId": "t-ghost", "repo": "svc-a", "title": "x", "description": ""}),
        )
        .await
        .unwrap();
    assert_eq!(status, 404);
    assert_eq!(body["kind"], "not-found");
}

#[tokio::test]
async fn queue_settings_roundtrip() {
    let engine = EngineHarness::spawn().await.unwrap();

    let (_, defaults) = engine.get("/queue/settings").await.unwrap();
    assert_eq!(defaults["paused"], false);
    assert_eq!(defaults["stopOnFailure"], false);
    assert_eq!(defaults["maxConcurrent"], 1);

    let (status, updated) = engine
        .post(
            "/queue/settings",
            json!({"paused": true, "maxConcurrent": 3}),
        )
        .await
        .unwrap();
    assert_eq!(status, 200);
    assert_eq!(updated["paused"], true);
    assert_eq!(updated["maxConcurrent"], 3);
    // Untouched keys keep their values.
    assert_eq!(updated["stopOnFailure"], false);

    let (status, body) = engine
        .post("/queue/settings", json!({"maxConcurrent": 0}))
        .await
        .unwrap();
    assert_eq!(status, 400);
    assert_eq!(body["kind"], "validation-error");
}

#[tokio::test]
async fn queue_listing_and_removal() {
    let engine = EngineHarness::spawn().await.unwrap();

    let (status, body) = engine.get("/queue").await.unwrap();
    assert_eq!(status, 200);
    assert!(body.as_array().unwrap().is_empty());

    let (status, body) = engine.delete("/queue/t-none").await.unwrap();
    assert_eq!(status, 404);
    assert_eq!(body["kind"], "not-found");

    let (status, body) = engine.post("/queue/clear", json!({})).await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body["removed"], 0);

    // Enqueueing an unmirrored task is refused.
    let (status, _) = engine.post("/queue/add/t-none", json!({})).await.unwrap();
    assert_eq!(status, 404);
}

#[tokio::test]
async fn event_files_move_from_pending_to_processed() {
    let engine = EngineHarness::spawn().await.unwrap();

    // A kind the router does not recognize stays pending until marked
    // manually, which keeps this test independent of router timing.
    let (status, event) = engine
        .post(
            "/events",
            json!({"type": "custom.ping", "taskId": "t1", "source": "e2e"}),
        )
        .await
        .unwrap();
    assert_eq!(status, 200);
    let id = event["id"].as_str().unwrap().to_string();
    assert_eq!(event["source"], "e2e");

    let (_, pending) = engine.get("/events/pending").await.unwrap();
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["type"], "custom.ping");

    // One file per event, lexicographically named.
    let files: Vec<_> = std::fs::read_dir(engine.events_pending_dir())
        .unwrap()
        .collect();
    assert_eq!(files.len(), 1);

    let (status, fetched) = engine.get(&format!("/events/{}", id)).await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(fetched["id"], id.as_str());

    let (status, _) = engine
        .post(&format!("/events/{}/processed", id), json!({}))
        .await
        .unwrap();
    assert_eq!(status, 200);

    let (_, pending) = engine.get("/events/pending").await.unwrap();
    assert!(pending.as_array().unwrap().is_empty());
    let (_, processed) = engine.get("/events/processed").await.unwrap();
    assert_eq!(processed.as_array().unwrap().len(), 1);

    // Marking twice reports not-found (the rename already happened).
    let (status, body) = engine
        .post(&format!("/events/{}/processed", id), json!({}))
        .await
        .unwrap();
    assert_eq!(status, 404);
    assert_eq!(body["kind"], "not-found");
}

#[tokio::test]
async fn malformed_event_bodies_are_rejected() {
    let engine = EngineHarness::spawn().await.unwrap();

    let (status, body) = engine.post("/events", json!(["not", "an", "object"])).await.unwrap();
    assert_eq!(status, 400);
    assert_eq!(body["kind"], "validation-error");

    let (status, body) = engine.post("/events", json!({"noType": true})).await.unwrap();
    assert_eq!(status, 400);
    assert_eq!(body["kind"], "validation-error");
}

#[tokio::test]
async fn service_logs_and_scm_listing_respond() {
    let engine = EngineHarness::spawn().await.unwrap();

    let (status, body) = engine.get("/logs").await.unwrap();
    assert_eq!(status, 200);
    assert!(body.is_array());

    let (status, body) = engine.get("/scm/repos").await.unwrap();
    assert_eq!(status, 200);
    assert!(body["repos"].is_array());

    let (status, body) = engine
        .post("/scm/clone", json!({"repo": "../escape"}))
        .await
        .unwrap();
    assert_eq!(status, 400);
    assert_eq!(body["kind"], "validation-error");
}
