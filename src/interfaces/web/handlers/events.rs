use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use super::super::AppState;
use crate::core::error::EngineError;
use crate::core::spool::{Event, EventPayload};

#[derive(Deserialize)]
pub struct ListQuery {
    limit: Option<usize>,
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Event>>, EngineError> {
    Ok(Json(state.spool.list_all(query.limit.unwrap_or(100)).await?))
}

/// Append a new event. The body is the payload itself (`type` plus the
/// kind's fields), with an optional `source`.
pub async fn create_event(
    State(state): State<AppState>,
    Json(mut body): Json<serde_json::Value>,
) -> Result<Json<Event>, EngineError> {
    let Some(map) = body.as_object_mut() else {
        return Err(EngineError::Validation("event body must be an object".into()));
    };
    if !map.contains_key("type") {
        return Err(EngineError::Validation("event body needs a type".into()));
    }
    let source = map
        .remove("source")
        .and_then(|s| s.as_str().map(str::to_string))
        .unwrap_or_else(|| "api".to_string());

    let payload: EventPayload = serde_json::from_value(body)
        .map_err(|e| EngineError::Validation(format!("event payload: {}", e)))?;
    let event = state.spool.append(payload, &source).await?;
    Ok(Json(event))
}

pub async fn pending_events(
    State(state): State<AppState>,
) -> Result<Json<Vec<Event>>, EngineError> {
    Ok(Json(state.spool.list_pending().await?))
}

pub async fn processed_events(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Event>>, EngineError> {
    Ok(Json(state.spool.list_processed(query.limit).await?))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Event>, EngineError> {
    Ok(Json(state.spool.get(&id).await?))
}

pub async fn mark_event_processed(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Event>, EngineError> {
    Ok(Json(state.spool.mark_processed(&id).await?))
}
