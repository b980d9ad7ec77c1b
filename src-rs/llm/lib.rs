pub mod openai_adapter;
pub mod rotation;
pub mod sse;
pub mod types;

pub use openai_adapter::{OpenAIAdapter, OpenAIConfig};
pub use rotation::Rotator;
pub use sse::{SseDecoder, SseEvent};
pub use types::{ChunkStream, CompletionRequest, InlineImage, ProviderAdapter, ProviderError, StreamChunk};
