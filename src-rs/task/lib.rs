pub mod backend;
pub mod error;
pub mod store;
pub mod types;

pub use backend::{BackendConnector, Connector, FileBackend, MemoryBackend, TaskBackend};
pub use error::StoreError;
pub use store::TaskStore;
pub use types::{Task, TaskPatch, TaskStatus};
