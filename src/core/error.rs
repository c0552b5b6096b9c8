use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Engine error, one variant per stable error kind. The kind string is part
/// of the API contract and is returned verbatim in error responses.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(String),
    #[error("spool error: {0}")]
    Spool(String),
    #[error("sandbox error: {0}")]
    Sandbox(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("recovery error: {0}")]
    Recovery(String),
    #[error("validation error: {0}")]
    Validation(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Store(_) => "store-error",
            EngineError::Spool(_) => "spool-error",
            EngineError::Sandbox(_) => "sandbox-error",
            EngineError::NotFound(_) => "not-found",
            EngineError::InvalidState(_) => "invalid-state",
            EngineError::Timeout(_) => "timeout",
            EngineError::Recovery(_) => "recovery-error",
            EngineError::Validation(_) => "validation-error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::InvalidState(_) => StatusCode::CONFLICT,
            EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Store(e.to_string())
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
