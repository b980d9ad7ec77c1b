use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::{Connector, TaskBackend};
use super::error::StoreError;
use super::types::{Task, TaskPatch, TaskStatus};

pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_CONNECT_DELAY: Duration = Duration::from_millis(500);

/// Process-wide task store.
///
/// The backend handle is opened on first use, pinged before every reuse and
/// reopened (up to `connect_attempts` times, `connect_delay` apart) when the
/// ping or an operation reports a connection fault.
///
/// Updates are read-merge-write without locking: two concurrent updates of
/// the same task race and the later write wins.
pub struct TaskStore {
    connector: Arc<dyn Connector>,
    handle: Mutex<Option<Arc<dyn TaskBackend>>>,
    reconnect: Mutex<()>,
    connect_attempts: u32,
    connect_delay: Duration,
}

impl TaskStore {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_retry(connector, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_DELAY)
    }

    pub fn with_retry(connector: Arc<dyn Connector>, connect_attempts: u32, connect_delay: Duration) -> Self {
        Self {
            connector,
            handle: Mutex::new(None),
            reconnect: Mutex::new(()),
            connect_attempts: connect_attempts.max(1),
            connect_delay,
        }
    }

    pub async fn create(&self, initial: TaskPatch) -> Result<Task, StoreError> {
        let backend = self.backend().await?;
        let now = Utc::now();
        let mut task = Task::shell(&Uuid::new_v4().to_string(), now);
        task.apply(initial);
        task.updated_at = Some(now);
        self.checked(backend.put(&task).await).await?;
        debug!(task_id = %task.id, "task created");
        Ok(task)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let backend = self.backend().await?;
        self.checked(backend.fetch(id).await).await
    }

    /// Merge `patch` and `status` into the stored record.
    ///
    /// A missing record is replaced by a fresh `pending` shell first, and the
    /// transition check only applies to records that actually existed.
    pub async fn update(&self, id: &str, status: TaskStatus, patch: TaskPatch) -> Result<Task, StoreError> {
        let backend = self.backend().await?;
        let now = Utc::now();
        let mut task = match self.checked(backend.fetch(id).await).await? {
            Some(existing) => {
                if !existing.status.can_transition_to(status) {
                    return Err(StoreError::InvalidTransition {
                        id: id.to_string(),
                        from: existing.status,
                        to: status,
                    });
                }
                existing
            }
            None => {
                warn!(task_id = %id, %status, "updating unknown task; starting from a pending shell");
                Task::shell(id, now)
            }
        };
        task.apply(patch);
        task.status = status;
        task.updated_at = Some(now);
        self.checked(backend.put(&task).await).await?;
        debug!(task_id = %id, %status, "task updated");
        Ok(task)
    }

    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let backend = self.backend().await?;
        self.checked(backend.remove(id).await).await
    }

    /// Drop every record not written within `retention`.
    pub async fn sweep_expired(&self, retention: Duration) -> Result<usize, StoreError> {
        let window = chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::hours(1));
        let backend = self.backend().await?;
        self.checked(backend.sweep(Utc::now() - window).await).await
    }

    /// The slot lock is held only to read or swap the handle. Pings run on a
    /// cloned handle, and reconnects are serialised by their own lock so a
    /// healthy handle is never queued behind them.
    async fn backend(&self) -> Result<Arc<dyn TaskBackend>, StoreError> {
        let current = self.handle.lock().await.clone();
        if let Some(backend) = current {
            match backend.ping().await {
                Ok(()) => return Ok(backend),
                Err(err) => {
                    warn!(store = %self.connector.describe(), error = %err, "task store ping failed; reconnecting");
                    let mut slot = self.handle.lock().await;
                    if slot.as_ref().is_some_and(|held| Arc::ptr_eq(held, &backend)) {
                        *slot = None;
                    }
                }
            }
        }

        let _reconnecting = self.reconnect.lock().await;
        if let Some(backend) = self.handle.lock().await.clone() {
            // Another caller reconnected while this one waited.
            return Ok(backend);
        }

        let mut reason = String::new();
        for attempt in 1..=self.connect_attempts {
            match self.connector.connect().await {
                Ok(backend) => {
                    info!(store = %self.connector.describe(), attempt, "task store connected");
                    *self.handle.lock().await = Some(backend.clone());
                    return Ok(backend);
                }
                Err(err) => {
                    warn!(store = %self.connector.describe(), attempt, error = %err, "task store connect failed");
                    reason = err.to_string();
                    if attempt < self.connect_attempts {
                        tokio::time::sleep(self.connect_delay).await;
                    }
                }
            }
        }
        Err(StoreError::Unavailable {
            attempts: self.connect_attempts,
            reason,
        })
    }

    /// Forget the handle when an operation failed in a way that points at it.
    async fn checked<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if let Err(err) = &result {
            if err.is_connection_fault() {
                *self.handle.lock().await = None;
            }
        }
        result
    }
}
