use thiserror::Error;

use super::types::TaskStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached after every connection attempt.
    #[error("task storage unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: u32, reason: String },

    #[error("task storage i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("task record encoding: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid task id: {0:?}")]
    InvalidId(String),

    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

impl StoreError {
    /// Errors that suggest the backend handle itself has gone bad.
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Unavailable { .. })
    }
}
