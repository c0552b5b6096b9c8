use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use super::super::AppState;
use crate::core::error::EngineError;
use crate::core::store::types::ServiceLogLine;

/// Liveness plus a small snapshot. Reports ok regardless of background
/// worker error rates.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let active = state
        .lifecycle
        .analytics()
        .await
        .map(|a| a.active())
        .unwrap_or(-1);
    let queue_depth = state
        .store
        .list_queue()
        .await
        .map(|q| q.len() as i64)
        .unwrap_or(-1);
    let pending_events = state
        .spool
        .list_pending()
        .await
        .map(|p| p.len() as i64)
        .unwrap_or(-1);
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "activeAgents": active,
        "queueDepth": queue_depth,
        "pendingEvents": pending_events,
    }))
}

#[derive(Deserialize)]
pub struct ListQuery {
    limit: Option<usize>,
}

pub async fn service_logs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ServiceLogLine>>, EngineError> {
    Ok(Json(
        state
            .store
            .list_service_logs(query.limit.unwrap_or(100))
            .await?,
    ))
}

pub async fn scm_repos(State(state): State<AppState>) -> Json<serde_json::Value> {
    let repos = state.workspace.list_projects().await;
    Json(serde_json::json!({ "repos": repos }))
}

#[derive(Deserialize)]
pub struct CloneBody {
    repo: String,
}

pub async fn scm_clone(
    State(state): State<AppState>,
    Json(body): Json<CloneBody>,
) -> Result<Json<serde_json::Value>, EngineError> {
    if body.repo.is_empty() || body.repo.contains('/') || body.repo.contains("..") {
        return Err(EngineError::Validation("invalid repo name".into()));
    }
    let path = state.workspace.clone_into_projects(&body.repo).await?;
    Ok(Json(serde_json::json!({
        "repo": body.repo,
        "path": path.to_string_lossy(),
    })))
}
