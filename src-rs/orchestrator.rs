use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, error, info, warn, Instrument};

use crate::error::OrchestratorError;
use crate::extract::{extract_image_url, extract_params};
use crate::llm::{CompletionRequest, InlineImage, ProviderAdapter};
use crate::task::{Task, TaskPatch, TaskStatus, TaskStore};

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Overrides the adapter's model when set.
    pub model: Option<String>,
    pub default_prompt: String,
    /// Upper bound on one whole upstream stream.
    pub generation_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: None,
            default_prompt: crate::config::DEFAULT_PROMPT.to_string(),
            generation_timeout: Duration::from_secs(300),
        }
    }
}

/// Drives a task from intake to a terminal state.
///
/// Every write goes through the [`TaskStore`]; nothing here ever touches an
/// HTTP response, so a detached run reports only through its task record.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<TaskStore>,
    provider: Option<Arc<dyn ProviderAdapter>>,
    cfg: Arc<OrchestratorConfig>,
}

impl Orchestrator {
    pub fn new(store: Arc<TaskStore>, provider: Option<Arc<dyn ProviderAdapter>>, cfg: OrchestratorConfig) -> Self {
        Self {
            store,
            provider,
            cfg: Arc::new(cfg),
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Trimmed prompt, or the configured default when nothing is left.
    pub fn resolve_prompt(&self, raw: Option<&str>) -> String {
        match raw.map(str::trim) {
            Some(prompt) if !prompt.is_empty() => prompt.to_string(),
            _ => self.cfg.default_prompt.clone(),
        }
    }

    fn provider(&self) -> Result<Arc<dyn ProviderAdapter>, OrchestratorError> {
        self.provider.clone().ok_or_else(|| {
            OrchestratorError::Configuration(
                "OPENAI_API_KEY is not set; configure an upstream API key to generate images".to_string(),
            )
        })
    }

    async fn intake(
        &self,
        prompt: Option<&str>,
        image: Option<InlineImage>,
    ) -> Result<(Task, CompletionRequest), OrchestratorError> {
        self.provider()?;
        let prompt = self.resolve_prompt(prompt);
        let task = self.store.create(TaskPatch::prompt(prompt.clone())).await?;
        info!(task_id = %task.id, with_image = image.is_some(), "generation task created");
        let request = CompletionRequest {
            prompt,
            image,
            model: self.cfg.model.clone(),
        };
        Ok((task, request))
    }

    /// Create the task and start generating in the background. Returns as soon
    /// as the `pending` record exists.
    pub async fn submit(&self, prompt: Option<&str>, image: Option<InlineImage>) -> Result<Task, OrchestratorError> {
        let (task, request) = self.intake(prompt, image).await?;
        let this = self.clone();
        let task_id = task.id.clone();
        let span = tracing::info_span!("generation", task_id = %task_id);
        tokio::spawn(
            async move {
                if let Err(err) = this.run_generation(&task_id, request).await {
                    error!(error = %err, "background generation failed");
                }
            }
            .instrument(span),
        );
        Ok(task)
    }

    /// Create the task and generate inline. Upstream failures and timeouts come
    /// back as the stored `failed` record rather than as an error.
    pub async fn generate(&self, prompt: Option<&str>, image: Option<InlineImage>) -> Result<Task, OrchestratorError> {
        let (task, request) = self.intake(prompt, image).await?;
        match self.run_generation(&task.id, request).await {
            Ok(done) => Ok(done),
            Err(OrchestratorError::Upstream(_) | OrchestratorError::TimedOut(_)) => {
                let failed = self.store.get(&task.id).await?;
                failed.ok_or_else(|| {
                    OrchestratorError::Store(crate::task::StoreError::Unavailable {
                        attempts: 0,
                        reason: format!("task {} vanished after failing", task.id),
                    })
                })
            }
            Err(err) => Err(err),
        }
    }

    /// The background routine. On any fatal error the task is marked `failed`
    /// (keeping the text received so far) and the error is handed back to the
    /// caller, which owns the error boundary.
    pub async fn run_generation(&self, id: &str, request: CompletionRequest) -> Result<Task, OrchestratorError> {
        let provider = self.provider()?;
        let mut content = String::new();

        let outcome = match self.store.update(id, TaskStatus::Processing, TaskPatch::default()).await {
            Ok(_) => {
                let timeout = self.cfg.generation_timeout;
                match tokio::time::timeout(timeout, self.consume(id, provider, request, &mut content)).await {
                    Ok(result) => result,
                    Err(_) => Err(OrchestratorError::TimedOut(timeout)),
                }
            }
            Err(err) => Err(err.into()),
        };

        match outcome {
            Ok(task) => Ok(task),
            Err(err) => {
                let message = err.task_message();
                warn!(task_id = %id, error = %message, received = content.len(), "generation failed");
                let kept = if content.is_empty() { None } else { Some(content) };
                if let Err(store_err) = self
                    .store
                    .update(id, TaskStatus::Failed, TaskPatch::failure(message, kept))
                    .await
                {
                    error!(task_id = %id, error = %store_err, "could not record task failure");
                }
                Err(err)
            }
        }
    }

    async fn consume(
        &self,
        id: &str,
        provider: Arc<dyn ProviderAdapter>,
        request: CompletionRequest,
        content: &mut String,
    ) -> Result<Task, OrchestratorError> {
        let mut stream = provider.stream(request).await.map_err(OrchestratorError::Upstream)?;
        debug!(task_id = %id, "upstream stream started");

        while let Some(item) = stream.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) if err.is_malformed_chunk() => {
                    warn!(task_id = %id, error = %err, "skipping malformed chunk");
                    self.report(id, TaskPatch::chunk_error(err.message)).await;
                    continue;
                }
                Err(err) => return Err(OrchestratorError::Upstream(err)),
            };

            let delta = chunk.content.unwrap_or_default();
            content.push_str(&delta);

            if let Some(reason) = chunk.finish_reason {
                info!(task_id = %id, finish_reason = %reason, "generation finished");
                return self.finalize(id, content, Some(reason)).await;
            }

            if !delta.is_empty() {
                if let Some(url) = extract_image_url(content) {
                    let patch = TaskPatch {
                        partial_content: Some(content.clone()),
                        partial_image_url: Some(url),
                        ..TaskPatch::default()
                    };
                    self.report(id, patch).await;
                }
            }
        }

        info!(task_id = %id, "stream ended without a finish reason; completing with what arrived");
        self.finalize(id, content, None).await
    }

    async fn finalize(&self, id: &str, content: &str, finish_reason: Option<String>) -> Result<Task, OrchestratorError> {
        let patch = TaskPatch {
            content: Some(content.to_string()),
            image_url: extract_image_url(content),
            params: extract_params(content),
            finish_reason,
            ..TaskPatch::default()
        };
        let task = self.store.update(id, TaskStatus::Completed, patch).await?;
        if task.image_url.is_none() {
            warn!(task_id = %id, "completed without an image url");
        }
        Ok(task)
    }

    /// Best-effort progress write; failures are logged and the stream goes on.
    async fn report(&self, id: &str, patch: TaskPatch) {
        if let Err(err) = self.store.update(id, TaskStatus::Processing, patch).await {
            warn!(task_id = %id, error = %err, "progress update failed");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::stream;

    use super::*;
    use crate::llm::{ChunkStream, ProviderError, StreamChunk};
    use crate::task::BackendConnector;

    /// Replays a fixed script of chunk results; optionally never ends.
    pub(crate) struct ScriptedProvider {
        pub script: Vec<Result<StreamChunk, ProviderError>>,
        pub hang_after: bool,
        pub open_error: Option<ProviderError>,
        pub seen: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(script: Vec<Result<StreamChunk, ProviderError>>) -> Self {
            Self {
                script,
                hang_after: false,
                open_error: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedProvider {
        async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError> {
            self.seen.lock().unwrap().push(request);
            if let Some(err) = &self.open_error {
                return Err(err.clone());
            }
            let scripted = stream::iter(self.script.clone());
            if self.hang_after {
                Ok(scripted.chain(stream::pending()).boxed())
            } else {
                Ok(scripted.boxed())
            }
        }
    }

    pub(crate) fn orchestrator(provider: ScriptedProvider) -> (Orchestrator, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let store = Arc::new(TaskStore::new(Arc::new(BackendConnector::from_url("memory://"))));
        let cfg = OrchestratorConfig {
            generation_timeout: Duration::from_millis(200),
            ..OrchestratorConfig::default()
        };
        (Orchestrator::new(store, Some(provider.clone()), cfg), provider)
    }

    fn red_balloon_script() -> Vec<Result<StreamChunk, ProviderError>> {
        vec![
            Ok(StreamChunk::text("Here ")),
            Ok(StreamChunk::text("is ")),
            Ok(StreamChunk::finished("![image](https://host/a.png)", "stop")),
        ]
    }

    #[tokio::test]
    async fn red_balloon_completes_with_image_url() {
        let (orch, provider) = orchestrator(ScriptedProvider::new(red_balloon_script()));
        let task = orch.generate(Some("red balloon"), None).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.prompt.as_deref(), Some("red balloon"));
        assert_eq!(task.content.as_deref(), Some("Here is ![image](https://host/a.png)"));
        assert_eq!(task.image_url.as_deref(), Some("https://host/a.png"));
        assert_eq!(task.finish_reason.as_deref(), Some("stop"));
        assert_eq!(provider.seen.lock().unwrap()[0].prompt, "red balloon");
    }

    #[tokio::test]
    async fn submit_returns_pending_before_generation_runs() {
        let (orch, _) = orchestrator(ScriptedProvider::new(red_balloon_script()));
        let task = orch.submit(Some("red balloon"), None).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let mut status = TaskStatus::Pending;
        for _ in 0..100 {
            status = orch.store().get(&task.id).await.unwrap().unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn blank_prompt_uses_default() {
        let (orch, provider) = orchestrator(ScriptedProvider::new(red_balloon_script()));
        let task = orch.generate(Some("   "), None).await.unwrap();
        assert_eq!(task.prompt.as_deref(), Some(crate::config::DEFAULT_PROMPT));
        assert_eq!(provider.seen.lock().unwrap()[0].prompt, crate::config::DEFAULT_PROMPT);
    }

    #[tokio::test]
    async fn missing_provider_fails_before_task_creation() {
        let store = Arc::new(TaskStore::new(Arc::new(BackendConnector::from_url("memory://"))));
        let orch = Orchestrator::new(store, None, OrchestratorConfig::default());
        let err = orch.submit(Some("red balloon"), None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(_)));
    }

    #[tokio::test]
    async fn stream_without_finish_reason_still_completes() {
        let script = vec![Ok(StreamChunk::text("![图片](https://host/b.png)"))];
        let (orch, _) = orchestrator(ScriptedProvider::new(script));
        let task = orch.generate(None, None).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.image_url.as_deref(), Some("https://host/b.png"));
        assert_eq!(task.finish_reason, None);
    }

    #[tokio::test]
    async fn upstream_failure_keeps_accumulated_content() {
        let script = vec![
            Ok(StreamChunk::text("Here ")),
            Ok(StreamChunk::text("is ")),
            Err(ProviderError::new("network_error", "boom", false)),
            Ok(StreamChunk::finished("never seen", "stop")),
        ];
        let (orch, _) = orchestrator(ScriptedProvider::new(script));
        let task = orch.generate(Some("red balloon"), None).await.unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("boom"));
        assert_eq!(task.content.as_deref(), Some("Here is "));
    }

    #[tokio::test]
    async fn failure_to_open_stream_marks_task_failed() {
        let mut provider = ScriptedProvider::new(Vec::new());
        provider.open_error = Some(ProviderError::new("auth_error", "invalid key", false));
        let (orch, _) = orchestrator(provider);
        let task = orch.generate(Some("x"), None).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("invalid key"));
        assert_eq!(task.content, None);
    }

    #[tokio::test]
    async fn run_generation_reraises_after_recording_failure() {
        let script = vec![Err(ProviderError::new("api_error", "content policy", false))];
        let (orch, _) = orchestrator(ScriptedProvider::new(script));
        let task = orch.store().create(TaskPatch::prompt("x")).await.unwrap();
        let request = CompletionRequest {
            prompt: "x".into(),
            image: None,
            model: None,
        };
        let err = orch.run_generation(&task.id, request).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Upstream(_)));
        let stored = orch.store().get(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn malformed_chunk_is_recorded_and_skipped() {
        let script = vec![
            Ok(StreamChunk::text("Here ")),
            Err(ProviderError::malformed("chunk has no choices")),
            Ok(StreamChunk::finished("![image](https://host/c.png)", "stop")),
        ];
        let (orch, _) = orchestrator(ScriptedProvider::new(script));
        let task = orch.generate(None, None).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.error_message.as_deref(), Some("chunk has no choices"));
        assert_eq!(task.image_url.as_deref(), Some("https://host/c.png"));
        assert_eq!(task.error, None);
    }

    #[tokio::test]
    async fn partial_progress_is_written_once_url_appears() {
        let mut provider = ScriptedProvider::new(vec![
            Ok(StreamChunk::text("progress 50% ")),
            Ok(StreamChunk::text("![image](https://host/d.png)")),
        ]);
        provider.hang_after = true;
        let (orch, _) = orchestrator(provider);
        let task = orch.submit(None, None).await.unwrap();

        let mut seen = None;
        for _ in 0..100 {
            let current = orch.store().get(&task.id).await.unwrap().unwrap();
            if current.partial_image_url.is_some() {
                seen = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let seen = seen.expect("partial update");
        assert_eq!(seen.status, TaskStatus::Processing);
        assert_eq!(seen.partial_image_url.as_deref(), Some("https://host/d.png"));
        assert_eq!(seen.partial_content.as_deref(), Some("progress 50% ![image](https://host/d.png)"));
    }

    #[tokio::test]
    async fn watchdog_fails_a_stuck_stream() {
        let mut provider = ScriptedProvider::new(vec![Ok(StreamChunk::text("warming up"))]);
        provider.hang_after = true;
        let (orch, _) = orchestrator(provider);
        let task = orch.generate(None, None).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("generation timed out after 200ms"));
        assert_eq!(task.content.as_deref(), Some("warming up"));
    }

    #[tokio::test]
    async fn params_block_is_extracted_on_completion() {
        let script = vec![
            Ok(StreamChunk::text("```json\n{\"prompt\":\"husky\",\"ratio\":\"2:3\"}\n```\n")),
            Ok(StreamChunk::finished("![图片](https://host/e.png)", "stop")),
        ];
        let (orch, _) = orchestrator(ScriptedProvider::new(script));
        let task = orch.generate(None, None).await.unwrap();
        assert_eq!(task.params.unwrap()["ratio"], "2:3");
    }
}
