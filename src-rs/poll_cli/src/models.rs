use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub struct PollConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub prompt: Option<String>,
    pub image: Option<PathBuf>,
    pub interval: Duration,
    pub max_polls: u32,
}

#[derive(Debug, Default, Serialize)]
pub struct PredictionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(rename = "imageType", skip_serializing_if = "Option::is_none")]
    pub image_type: Option<String>,
}

/// Body of a `202` from `POST /predictions`.
#[derive(Debug, Deserialize)]
pub struct Accepted {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub poll_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub partial_image_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl TaskInfo {
    pub fn is_terminal(&self) -> bool {
        self.status == "completed" || self.status == "failed"
    }
}

/// What the server handed back for a submission.
#[derive(Debug)]
pub enum Submission {
    Queued(Accepted),
    Finished(TaskInfo),
}
