use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Reference image sent inline with the prompt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InlineImage {
    /// Base64 payload without the `data:` prefix.
    pub data: String,
    pub media_type: String,
}

impl InlineImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub image: Option<InlineImage>,
    pub model: Option<String>,
}

/// One increment of streamed text. `finish_reason` is only set on the last one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
}

impl StreamChunk {
    pub fn text(content: &str) -> Self {
        Self {
            content: Some(content.to_string()),
            finish_reason: None,
        }
    }

    pub fn finished(content: &str, reason: &str) -> Self {
        Self {
            content: Some(content.to_string()),
            finish_reason: Some(reason.to_string()),
        }
    }
}

pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ProviderError>>;

pub const MALFORMED_CHUNK: &str = "malformed_chunk";

#[derive(Clone, Debug)]
pub struct ProviderError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl ProviderError {
    pub fn new(code: &str, message: &str, retryable: bool) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            retryable,
        }
    }

    pub fn malformed(message: &str) -> Self {
        Self::new(MALFORMED_CHUNK, message, false)
    }

    /// A single bad chunk; the stream itself is still usable.
    pub fn is_malformed_chunk(&self) -> bool {
        self.code == MALFORMED_CHUNK
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProviderError {}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Open one streamed completion. The returned stream is finite and cannot
    /// be restarted; retrying means calling `stream` again.
    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError>;
}
