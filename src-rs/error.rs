//! Error types shared by the orchestrator and the HTTP layer.
//!
//! Handlers return `Result<_, ServerError>`; [`ServerError`] renders itself as
//! a JSON `{ "error": ... }` body. Internal failures are logged in full and
//! answered with a generic message.

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::llm::ProviderError;
use crate::task::StoreError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A required credential or connection setting is missing.
    #[error("{0}")]
    Configuration(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("upstream error: {0}")]
    Upstream(ProviderError),

    #[error("generation timed out after {0:?}")]
    TimedOut(Duration),
}

impl OrchestratorError {
    /// Text recorded on a failed task.
    pub fn task_message(&self) -> String {
        match self {
            OrchestratorError::Upstream(err) => err.message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { .. } => ServerError::StorageUnavailable(err.to_string()),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        ServerError::BadRequest(rejection.body_text())
    }
}

impl From<OrchestratorError> for ServerError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Configuration(message) => ServerError::Configuration(message),
            OrchestratorError::Store(err) => err.into(),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ServerError::Configuration(m) => {
                error!(message = %m, "configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, m.clone())
            }
            ServerError::StorageUnavailable(m) => {
                error!(message = %m, "task storage unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, "task storage unavailable".to_string())
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}
