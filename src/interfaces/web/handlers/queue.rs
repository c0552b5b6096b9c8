use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

use super::super::AppState;
use crate::core::error::EngineError;
use crate::core::store::types::{QueueEntry, QueueSettings, TaskRecord, TaskStatus};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueView {
    #[serde(flatten)]
    entry: QueueEntry,
    task: Option<TaskRecord>,
}

pub async fn get_queue(
    State(state): State<AppState>,
) -> Result<Json<Vec<QueueView>>, EngineError> {
    let entries = state.store.list_queue().await?;
    let mut view = Vec::with_capacity(entries.len());
    for entry in entries {
        let task = state.store.get_task(&entry.task_id).await.ok();
        view.push(QueueView { entry, task });
    }
    Ok(Json(view))
}

pub async fn get_queue_settings(
    State(state): State<AppState>,
) -> Result<Json<QueueSettings>, EngineError> {
    Ok(Json(state.store.get_queue_settings().await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    paused: Option<bool>,
    stop_on_failure: Option<bool>,
    max_concurrent: Option<i64>,
}

pub async fn set_queue_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<QueueSettings>, EngineError> {
    if let Some(max) = update.max_concurrent
        && max < 1
    {
        return Err(EngineError::Validation(
            "maxConcurrent must be at least 1".into(),
        ));
    }
    if let Some(paused) = update.paused {
        state
            .store
            .set_queue_setting("paused", if paused { "true" } else { "false" })
            .await?;
    }
    if let Some(stop) = update.stop_on_failure {
        state
            .store
            .set_queue_setting("stop_on_failure", if stop { "true" } else { "false" })
            .await?;
    }
    if let Some(max) = update.max_concurrent {
        state
            .store
            .set_queue_setting("max_concurrent", &max.to_string())
            .await?;
    }
    Ok(Json(state.store.get_queue_settings().await?))
}

pub async fn add_to_queue(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<QueueEntry>, EngineError> {
    // The task must already be mirrored locally.
    state.store.get_task(&task_id).await?;
    state
        .store
        .update_task_status(&task_id, TaskStatus::Queued)
        .await?;
    let entry = state.store.enqueue_task(&task_id).await?;
    Ok(Json(entry))
}

pub async fn remove_from_queue(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, EngineError> {
    if !state.store.delete_queue_entry(&task_id).await? {
        return Err(EngineError::NotFound(format!("queue entry {}", task_id)));
    }
    Ok(Json(serde_json::json!({ "removed": task_id })))
}

pub async fn clear_queue(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let removed = state.store.clear_queue().await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}
