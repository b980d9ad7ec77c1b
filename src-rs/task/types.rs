use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether a stored record in `self` may be rewritten with `next`.
    ///
    /// Terminal states accept nothing; `pending` may go straight to `failed`
    /// when intake breaks before the background routine starts.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Pending | Processing | Failed) => true,
            (Processing, Processing | Completed | Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(rename = "createdAt", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(
        rename = "updatedAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl Task {
    /// Blank record used both for fresh tasks and for the upsert shell.
    pub fn shell(id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            status: TaskStatus::Pending,
            prompt: None,
            created_at: now,
            updated_at: None,
            content: None,
            partial_content: None,
            image_url: None,
            partial_image_url: None,
            params: None,
            error: None,
            error_message: None,
            finish_reason: None,
        }
    }

    /// The timestamp used for expiry: last write, or creation if never updated.
    pub fn last_touched(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    pub fn apply(&mut self, patch: TaskPatch) {
        merge(&mut self.prompt, patch.prompt);
        merge(&mut self.content, patch.content);
        merge(&mut self.partial_content, patch.partial_content);
        merge(&mut self.image_url, patch.image_url);
        merge(&mut self.partial_image_url, patch.partial_image_url);
        merge(&mut self.params, patch.params);
        merge(&mut self.error, patch.error);
        merge(&mut self.error_message, patch.error_message);
        merge(&mut self.finish_reason, patch.finish_reason);
    }
}

fn merge<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Fields written by `create` and `update`. `None` leaves the stored value alone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskPatch {
    pub prompt: Option<String>,
    pub content: Option<String>,
    pub partial_content: Option<String>,
    pub image_url: Option<String>,
    pub partial_image_url: Option<String>,
    pub params: Option<Value>,
    pub error: Option<String>,
    pub error_message: Option<String>,
    pub finish_reason: Option<String>,
}

impl TaskPatch {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>, content: Option<String>) -> Self {
        Self {
            error: Some(message.into()),
            content,
            ..Self::default()
        }
    }

    pub fn chunk_error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}
