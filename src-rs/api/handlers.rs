use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::cleanup::CleanupScheduler;
use crate::config::{DeliveryMode, ServerConfig};
use crate::error::ServerError;
use crate::llm::InlineImage;
use crate::orchestrator::Orchestrator;
use crate::task::{Task, TaskStatus};

const DEFAULT_IMAGE_TYPE: &str = "image/png";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub orchestrator: Orchestrator,
    pub cleanup: Arc<CleanupScheduler>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PredictionRequest {
    pub prompt: Option<String>,
    /// Base64 payload, optionally as a full `data:` URL.
    pub image: Option<String>,
    #[serde(rename = "imageType")]
    pub image_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: String,
    pub status: TaskStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_url: Option<String>,
}

pub async fn handle_health() -> Json<Value> {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

pub async fn handle_create(
    State(state): State<AppState>,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ServerError> {
    let Json(req) = payload?;
    let image = parse_inline_image(req.image.as_deref(), req.image_type.as_deref())?;
    let prompt = req.prompt.as_deref();

    match state.config.delivery {
        DeliveryMode::Polling => {
            let task = state.orchestrator.submit(prompt, image).await?;
            let poll_url = state
                .config
                .public_url
                .as_ref()
                .map(|base| format!("{}/predictions/{}", base, task.id));
            let body = SubmitResponse {
                id: task.id,
                status: task.status,
                message: "image generation task started".to_string(),
                poll_url,
            };
            Ok((StatusCode::ACCEPTED, Json(to_value(&body)?)))
        }
        DeliveryMode::Direct => {
            let task = state.orchestrator.generate(prompt, image).await?;
            let status = if task.status == TaskStatus::Failed {
                StatusCode::BAD_GATEWAY
            } else {
                StatusCode::CREATED
            };
            if task.status.is_terminal() {
                state.cleanup.schedule(&task.id);
            }
            Ok((status, Json(to_value(&task)?)))
        }
    }
}

pub async fn handle_get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Task>, ServerError> {
    let task = state
        .orchestrator
        .store()
        .get(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("task {} not found", id)))?;

    if task.status.is_terminal() && state.cleanup.schedule(&task.id) {
        info!(task_id = %task.id, status = %task.status, "finished task scheduled for cleanup");
    } else {
        debug!(task_id = %task.id, status = %task.status, "task polled");
    }
    Ok(Json(task))
}

/// Accepts bare base64 or a `data:<type>;base64,<payload>` URL. The media type
/// comes from `imageType`, then the data URL, then falls back to PNG.
pub fn parse_inline_image(image: Option<&str>, image_type: Option<&str>) -> Result<Option<InlineImage>, ServerError> {
    let raw = match image.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(None),
    };

    let (url_type, data) = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| ServerError::BadRequest("image data URL has no payload".to_string()))?;
            let media = header.strip_suffix(";base64").ok_or_else(|| {
                ServerError::BadRequest("image data URL must be base64 encoded".to_string())
            })?;
            (Some(media), payload)
        }
        None => (None, raw),
    };

    STANDARD
        .decode(data)
        .map_err(|err| ServerError::BadRequest(format!("image is not valid base64: {}", err)))?;

    let media_type = image_type
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or(url_type.filter(|t| !t.is_empty()))
        .unwrap_or(DEFAULT_IMAGE_TYPE);

    Ok(Some(InlineImage {
        data: data.to_string(),
        media_type: media_type.to_string(),
    }))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ServerError> {
    serde_json::to_value(value).map_err(|err| ServerError::Internal(err.to_string()))
}
