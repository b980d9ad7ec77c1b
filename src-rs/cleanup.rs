//! Deferred deletion of finished tasks and the periodic expiry sweep.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::task::TaskStore;

/// Deletes a task a fixed delay after it was first seen in a terminal state.
/// At most one timer is pending per task.
pub struct CleanupScheduler {
    store: Arc<TaskStore>,
    delay: Duration,
    pending: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for CleanupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.pending.lock().map(|p| p.len()).unwrap_or(0);
        write!(f, "CleanupScheduler({count} pending, delay {:?})", self.delay)
    }
}

impl CleanupScheduler {
    pub fn new(store: Arc<TaskStore>, delay: Duration) -> Self {
        Self {
            store,
            delay,
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// Returns `false` when a timer for `id` is already running.
    pub fn schedule(self: &Arc<Self>, id: &str) -> bool {
        match self.pending.lock() {
            Ok(mut pending) => {
                if !pending.insert(id.to_string()) {
                    return false;
                }
            }
            Err(_) => return false,
        }

        let this = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(this.delay).await;
            match this.store.delete(&id).await {
                Ok(true) => info!(task_id = %id, "finished task cleaned up"),
                Ok(false) => debug!(task_id = %id, "finished task already gone"),
                Err(err) => warn!(task_id = %id, error = %err, "task cleanup failed"),
            }
            if let Ok(mut pending) = this.pending.lock() {
                pending.remove(&id);
            }
        });
        true
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

/// Every `interval`, drop records untouched for longer than `retention`.
pub fn spawn_expiry_sweep(store: Arc<TaskStore>, interval: Duration, retention: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.sweep_expired(retention).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "expired tasks swept"),
                Err(err) => warn!(error = %err, "expiry sweep failed"),
            }
        }
    })
}
