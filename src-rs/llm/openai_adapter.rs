use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::rotation::Rotator;
use super::sse::{SseDecoder, SseEvent};
use super::types::{ChunkStream, CompletionRequest, ProviderAdapter, ProviderError, StreamChunk};

pub const DEFAULT_BASE_URL: &str = "https://api.laozhang.ai/v1";
pub const DEFAULT_MODEL: &str = "sora-image";

pub struct OpenAIConfig {
    pub api_keys: Vec<String>,
    pub base_url: String,
    pub model: String,
}

/// Streams `chat/completions` from any OpenAI-compatible endpoint.
pub struct OpenAIAdapter {
    cfg: OpenAIConfig,
    rotator: Rotator,
    client: Client,
}

impl OpenAIAdapter {
    pub fn new(mut cfg: OpenAIConfig) -> Result<Self, ProviderError> {
        if cfg.base_url.is_empty() {
            cfg.base_url = DEFAULT_BASE_URL.to_string();
        }
        if cfg.model.is_empty() {
            cfg.model = DEFAULT_MODEL.to_string();
        }
        // No overall timeout: streams legitimately run for minutes and the
        // orchestrator's watchdog bounds them instead.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| ProviderError::new("client_error", &err.to_string(), false))?;
        Ok(Self {
            rotator: Rotator::new(cfg.api_keys.clone()),
            cfg,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }
}

#[async_trait]
impl ProviderAdapter for OpenAIAdapter {
    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let model = request.model.clone().unwrap_or_else(|| self.cfg.model.clone());
        let payload = build_payload(&model, &request);

        let tries = self.rotator.len();
        if tries == 0 {
            return Err(ProviderError::new("auth_error", "no upstream API keys", false));
        }
        let mut last_err = None;
        for attempt in 1..=tries {
            let key = match self.rotator.next() {
                Some(key) => key,
                None => break,
            };
            match open_stream(&self.client, &self.cfg.base_url, key, &payload).await {
                Ok(stream) => return Ok(stream),
                Err(err) if err.retryable && attempt < tries => {
                    warn!(attempt, error = %err, "upstream request failed; trying next key");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| ProviderError::new("api_error", "request failed", true)))
    }
}

pub fn build_payload(model: &str, request: &CompletionRequest) -> Value {
    let content = match &request.image {
        Some(image) => json!([
            {"type": "text", "text": request.prompt},
            {"type": "image_url", "image_url": {"url": image.data_url()}}
        ]),
        None => json!(request.prompt),
    };
    json!({
        "model": model,
        "stream": true,
        "messages": [
            {"role": "user", "content": content}
        ]
    })
}

async fn open_stream(
    client: &Client,
    base_url: &str,
    api_key: &str,
    payload: &Value,
) -> Result<ChunkStream, ProviderError> {
    let endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let resp = client
        .post(endpoint)
        .bearer_auth(api_key)
        .header("Accept", "text/event-stream")
        .json(payload)
        .send()
        .await
        .map_err(|err| ProviderError::new("network_error", &err.to_string(), true))?;

    let status = resp.status();
    if status.is_client_error() || status.is_server_error() {
        let body = resp.text().await.unwrap_or_default();
        return Err(classify_status(status.as_u16(), &body));
    }
    debug!(%status, "upstream stream opened");
    Ok(decode_body(resp.bytes_stream()))
}

fn classify_status(status: u16, body: &str) -> ProviderError {
    let message = status_message(status, body);
    let lowered = message.to_lowercase();
    if status == 401 || status == 403 {
        return ProviderError::new("auth_error", &message, true);
    }
    if status == 429 || lowered.contains("quota") || lowered.contains("rate limit") {
        return ProviderError::new("rate_limit", &message, true);
    }
    if status >= 500 {
        return ProviderError::new("server_error", &message, true);
    }
    ProviderError::new("api_error", &message, false)
}

/// Readable text for a non-2xx answer: the JSON `error.message` when there is
/// one, else the trimmed body, else the bare status.
fn status_message(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return format!("upstream returned HTTP {}", status);
    }
    match serde_json::from_str::<Value>(body) {
        Ok(value) => match value.get("error") {
            Some(error) => error_text(error),
            None => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}

/// `{"message": ...}` objects yield the message; anything else is shown as-is.
fn error_text(error: &Value) -> String {
    match error {
        Value::String(text) => text.clone(),
        other => other
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

/// Turn a raw SSE body into chunks. A fatal error ends the stream right
/// after it is yielded; malformed chunks do not.
pub fn decode_body<S, B, E>(body: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    struct State<S> {
        body: std::pin::Pin<Box<S>>,
        decoder: SseDecoder,
        queue: VecDeque<Result<StreamChunk, ProviderError>>,
        finished: bool,
    }

    let state = State {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        queue: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.queue.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            let events = match state.body.next().await {
                Some(Ok(bytes)) => state.decoder.feed(bytes.as_ref()),
                Some(Err(err)) => {
                    state.finished = true;
                    state
                        .queue
                        .push_back(Err(ProviderError::new("network_error", &err.to_string(), false)));
                    continue;
                }
                None => {
                    state.finished = true;
                    state.decoder.finish()
                }
            };
            for event in events {
                match event {
                    SseEvent::Done => {
                        state.finished = true;
                        break;
                    }
                    SseEvent::Data(data) => {
                        let parsed = parse_chunk(&data);
                        let fatal = matches!(&parsed, Err(err) if !err.is_malformed_chunk());
                        state.queue.push_back(parsed);
                        if fatal {
                            state.finished = true;
                            break;
                        }
                    }
                }
            }
        }
    })
    .boxed()
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Option<Vec<WireChoice>>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: Option<WireDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

pub fn parse_chunk(data: &str) -> Result<StreamChunk, ProviderError> {
    let wire: WireChunk = serde_json::from_str(data)
        .map_err(|err| ProviderError::malformed(&format!("invalid chunk json: {err}")))?;
    if let Some(error) = wire.error {
        return Err(ProviderError::new("api_error", &error_text(&error), false));
    }
    let choices = wire
        .choices
        .ok_or_else(|| ProviderError::malformed("chunk has no choices"))?;
    let first = match choices.into_iter().next() {
        Some(choice) => choice,
        None => return Ok(StreamChunk::default()),
    };
    Ok(StreamChunk {
        content: first.delta.and_then(|delta| delta.content),
        finish_reason: first.finish_reason,
    })
}
