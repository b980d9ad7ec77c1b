pub mod cleanup;
pub mod config;
pub mod error;
pub mod extract;
pub mod helpers;
pub mod orchestrator;

#[path = "llm/lib.rs"]
pub mod llm;
#[path = "task/lib.rs"]
pub mod task;
#[path = "api/lib.rs"]
pub mod api;

pub use crate::cleanup::{spawn_expiry_sweep, CleanupScheduler};
pub use crate::config::{DeliveryMode, ServerConfig};
pub use crate::error::{OrchestratorError, ServerError};
pub use crate::extract::{extract_image_url, extract_params};
pub use crate::llm::{
    ChunkStream, CompletionRequest, InlineImage, OpenAIAdapter, OpenAIConfig, ProviderAdapter, ProviderError,
    StreamChunk,
};
pub use crate::orchestrator::{Orchestrator, OrchestratorConfig};
pub use crate::task::{BackendConnector, StoreError, Task, TaskPatch, TaskStatus, TaskStore};
