use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use super::super::AppState;
use crate::core::agents::{AgentSpawnRequest, KillReason};
use crate::core::error::EngineError;
use crate::core::store::types::{AgentAnalytics, AgentLogLine, AgentRecord};

#[derive(Deserialize)]
pub struct ListQuery {
    limit: Option<usize>,
}

pub async fn spawn_agent(
    State(state): State<AppState>,
    Json(request): Json<AgentSpawnRequest>,
) -> Result<Json<AgentRecord>, EngineError> {
    let agent = state.lifecycle.spawn(request).await?;
    Ok(Json(agent))
}

pub async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<AgentRecord>>, EngineError> {
    let agents = state.lifecycle.list(query.limit.unwrap_or(100)).await?;
    Ok(Json(agents))
}

pub async fn active_agents(
    State(state): State<AppState>,
) -> Result<Json<Vec<AgentRecord>>, EngineError> {
    Ok(Json(state.lifecycle.get_active().await?))
}

pub async fn agent_analytics(
    State(state): State<AppState>,
) -> Result<Json<AgentAnalytics>, EngineError> {
    Ok(Json(state.lifecycle.analytics().await?))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentRecord>, EngineError> {
    Ok(Json(state.lifecycle.get_by_id(&id).await?))
}

pub async fn agent_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AgentLogLine>>, EngineError> {
    // 404 for unknown agents rather than an empty list.
    state.lifecycle.get_by_id(&id).await?;
    Ok(Json(state.lifecycle.get_logs(&id).await?))
}

#[derive(Deserialize, Default)]
pub struct KillBody {
    reason: Option<KillReason>,
}

pub async fn kill_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<KillBody>>,
) -> Result<Json<AgentRecord>, EngineError> {
    // Existence check first so unknown ids surface as not-found instead of
    // the kill no-op.
    state.lifecycle.get_by_id(&id).await?;
    let reason = body
        .and_then(|Json(body)| body.reason)
        .unwrap_or(KillReason::Killed);
    state.lifecycle.kill(&id, reason).await?;
    Ok(Json(state.lifecycle.get_by_id(&id).await?))
}

pub async fn retry_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentRecord>, EngineError> {
    Ok(Json(state.lifecycle.retry(&id).await?))
}
