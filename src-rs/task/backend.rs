//! Storage media for task records.
//!
//! A [`TaskBackend`] is a live handle on some medium; a [`Connector`] knows
//! how to open one. [`super::TaskStore`] owns the connector and decides when
//! a handle needs to be (re)opened.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::StoreError;
use super::types::Task;

#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Cheap liveness probe run before every reuse of the handle.
    async fn ping(&self) -> Result<(), StoreError>;
    async fn put(&self, task: &Task) -> Result<(), StoreError>;
    async fn fetch(&self, id: &str) -> Result<Option<Task>, StoreError>;
    async fn remove(&self, id: &str) -> Result<bool, StoreError>;
    /// Remove every record last written before `cutoff`; returns how many went.
    async fn sweep(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn TaskBackend>, StoreError>;
    fn describe(&self) -> String;
}

/// Connector chosen from a store URL.
///
/// `memory://` keeps records in the process; `file:///some/dir` or a bare path
/// keeps one JSON file per task in that directory.
#[derive(Clone)]
pub enum BackendConnector {
    Memory(Arc<MemoryBackend>),
    Directory(PathBuf),
}

impl BackendConnector {
    pub fn from_url(url: &str) -> Self {
        let url = url.trim();
        if url.is_empty() || url.eq_ignore_ascii_case("memory://") || url.eq_ignore_ascii_case("memory") {
            return BackendConnector::Memory(Arc::new(MemoryBackend::new()));
        }
        let path = url.strip_prefix("file://").unwrap_or(url);
        BackendConnector::Directory(PathBuf::from(path))
    }
}

#[async_trait]
impl Connector for BackendConnector {
    async fn connect(&self) -> Result<Arc<dyn TaskBackend>, StoreError> {
        match self {
            BackendConnector::Memory(backend) => Ok(backend.clone()),
            BackendConnector::Directory(dir) => {
                let backend = FileBackend::open(dir.clone()).await?;
                Ok(Arc::new(backend))
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            BackendConnector::Memory(_) => "memory://".to_string(),
            BackendConnector::Directory(dir) => format!("file://{}", dir.display()),
        }
    }
}

pub struct MemoryBackend {
    tasks: RwLock<HashMap<String, Task>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable {
        attempts: 0,
        reason: "task map lock poisoned".to_string(),
    }
}

#[async_trait]
impl TaskBackend for MemoryBackend {
    async fn ping(&self) -> Result<(), StoreError> {
        self.tasks.read().map(|_| ()).map_err(|_| poisoned())
    }

    async fn put(&self, task: &Task) -> Result<(), StoreError> {
        let mut map = self.tasks.write().map_err(|_| poisoned())?;
        map.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let map = self.tasks.read().map_err(|_| poisoned())?;
        Ok(map.get(id).cloned())
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let mut map = self.tasks.write().map_err(|_| poisoned())?;
        Ok(map.remove(id).is_some())
    }

    async fn sweep(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut map = self.tasks.write().map_err(|_| poisoned())?;
        let before = map.len();
        map.retain(|_, task| task.last_touched() >= cutoff);
        Ok(before - map.len())
    }
}

/// One pretty-printed `task_<id>.json` per record.
pub struct FileBackend {
    dir: PathBuf,
}

const FILE_PREFIX: &str = "task_";
const FILE_SUFFIX: &str = ".json";

impl FileBackend {
    pub async fn open(dir: PathBuf) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&dir).await?;
        let backend = Self { dir };
        backend.ping().await?;
        Ok(backend)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        if !is_safe_id(id) {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{FILE_PREFIX}{id}{FILE_SUFFIX}")))
    }
}

/// IDs become file names, so only a conservative alphabet is accepted.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
impl TaskBackend for FileBackend {
    async fn ping(&self) -> Result<(), StoreError> {
        let meta = tokio::fs::metadata(&self.dir).await?;
        if !meta.is_dir() {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("{} is not a directory", self.dir.display()),
            )));
        }
        Ok(())
    }

    async fn put(&self, task: &Task) -> Result<(), StoreError> {
        let path = self.record_path(&task.id)?;
        let serialized = serde_json::to_vec_pretty(task)?;
        // Every write stages through its own file so overlapping writes of
        // one task never rename each other's staging file away.
        let staging = self.dir.join(format!(".{}.{}.tmp", task.id, Uuid::new_v4().simple()));
        tokio::fs::write(&staging, serialized).await?;
        if let Err(err) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let path = match self.record_path(id) {
            Ok(path) => path,
            Err(_) => return Ok(None),
        };
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let path = match self.record_path(id) {
            Ok(path) => path,
            Err(_) => return Ok(false),
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn sweep(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = SystemTime::from(cutoff);
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(FILE_PREFIX) || !name.ends_with(FILE_SUFFIX) {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(err) => {
                    warn!(file = %name, error = %err, "skipping task file without mtime");
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    debug!(file = %name, "expired task file removed");
                    removed += 1;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(removed)
    }
}
