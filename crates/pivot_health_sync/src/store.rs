//! Durable key-value storage for credentials and checkpoints.
//!
//! Replaces process-wide ambient settings: every component that persists
//! state receives an `Arc<dyn KeyValueStore>` instead.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

use crate::error::{SyncError, SyncResult};

/// Sets and removals applied together by [`KeyValueStore::write`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteBatch {
    pub set: Vec<(String, Value)>,
    pub remove: Vec<String>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set.push((key.into(), value));
        self
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.remove.push(key.into());
        self
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> SyncResult<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> SyncResult<()>;

    /// Apply a batch as one unit: either every change becomes visible or none.
    async fn write(&self, batch: WriteBatch) -> SyncResult<()>;

    async fn remove(&self, key: &str) -> SyncResult<()>;

    async fn set_many(&self, entries: Vec<(String, Value)>) -> SyncResult<()> {
        self.write(WriteBatch {
            set: entries,
            remove: Vec::new(),
        })
        .await
    }
}

/// In-memory store for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> SyncResult<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn write(&self, batch: WriteBatch) -> SyncResult<()> {
        let mut map = self.entries.write().await;
        for key in &batch.remove {
            map.remove(key);
        }
        map.extend(batch.set);
        Ok(())
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// A single JSON object on disk, rewritten through a temp file on every
/// mutation.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    /// Open the store, starting empty when the file does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Map::new(),
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)? {
                Value::Object(map) => map,
                other => {
                    return Err(SyncError::Store(format!(
                        "{} does not hold a JSON object (found {})",
                        path.display(),
                        kind_of(&other)
                    )));
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), keys = entries.len(), "opened state file");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    async fn persist(&self, entries: &Map<String, Value>) -> SyncResult<()> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Apply `mutate` to a copy and only keep it once it is on disk.
    async fn update<F>(&self, mutate: F) -> SyncResult<()>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let mut guard = self.entries.lock().await;
        let mut next = guard.clone();
        mutate(&mut next);
        self.persist(&next).await?;
        *guard = next;
        Ok(())
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> SyncResult<()> {
        self.update(|m| {
            m.insert(key.to_string(), value);
        })
        .await
    }

    async fn write(&self, batch: WriteBatch) -> SyncResult<()> {
        self.update(|m| {
            for key in &batch.remove {
                m.remove(key);
            }
            m.extend(batch.set);
        })
        .await
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        self.update(|m| {
            m.remove(key);
        })
        .await
    }
}
