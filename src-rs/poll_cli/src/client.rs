use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;

use crate::models::{Accepted, PredictionRequest, Submission, TaskInfo};

/// A failed poll. `retryable` failures are worth another attempt.
#[derive(Debug)]
pub struct PollError {
    pub message: String,
    pub retryable: bool,
}

pub struct HTTPClient {
    pub base_url: String,
    pub token: Option<String>,
    client: Client,
}

impl HTTPClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|err| err.to_string())?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    /// Submit a prompt. A `direct` server answers with the finished record,
    /// a `polling` one with a task ID to poll.
    pub fn submit(&self, req: &PredictionRequest) -> Result<Submission, String> {
        let url = format!("{}/predictions", self.base_url);
        let resp = self
            .authorize(self.client.post(url))
            .json(req)
            .send()
            .map_err(|err| err.to_string())?;

        match resp.status() {
            StatusCode::ACCEPTED => resp
                .json::<Accepted>()
                .map(Submission::Queued)
                .map_err(|err| err.to_string()),
            StatusCode::CREATED | StatusCode::BAD_GATEWAY => resp
                .json::<TaskInfo>()
                .map(Submission::Finished)
                .map_err(|err| err.to_string()),
            _ => Err(error_text(resp)),
        }
    }

    pub fn poll(&self, id: &str) -> Result<TaskInfo, PollError> {
        let url = format!("{}/predictions/{}", self.base_url, id);
        let resp = self.authorize(self.client.get(url)).send().map_err(|err| PollError {
            message: err.to_string(),
            retryable: true,
        })?;

        let status = resp.status();
        if status.is_success() {
            return resp.json::<TaskInfo>().map_err(|err| PollError {
                message: err.to_string(),
                retryable: true,
            });
        }
        Err(PollError {
            retryable: status.is_server_error(),
            message: error_text(resp),
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

pub fn load_image(path: &Path) -> Result<(String, String), String> {
    let bytes = std::fs::read(path).map_err(|err| format!("{}: {}", path.display(), err))?;
    Ok((STANDARD.encode(bytes), media_type_for(path).to_string()))
}

pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/png",
    }
}

fn error_text(resp: Response) -> String {
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);
    format!("http {}: {}", status.as_u16(), message)
}
