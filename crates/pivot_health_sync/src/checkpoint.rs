//! Per-kind sync cursors ("anchors").

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SyncResult;
use crate::store::KeyValueStore;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncCheckpoint {
    pub kind_id: String,
    pub cursor: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn KeyValueStore>,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn key(kind_id: &str) -> String {
        format!("anchor_{kind_id}")
    }

    /// Stored cursor for `kind_id`. Unreadable values are treated as absent.
    pub async fn read(&self, kind_id: &str) -> SyncResult<Option<DateTime<Utc>>> {
        let raw = self.store.get(&Self::key(kind_id)).await?;
        Ok(match raw {
            Some(Value::String(s)) => match DateTime::parse_from_rfc3339(&s) {
                Ok(dt) => Some(dt.with_timezone(&Utc)),
                Err(e) => {
                    tracing::warn!(kind = kind_id, error = %e, "ignoring unreadable checkpoint");
                    None
                }
            },
            Some(_) | None => None,
        })
    }

    pub async fn write(&self, kind_id: &str, cursor: DateTime<Utc>) -> SyncResult<()> {
        self.store
            .set(&Self::key(kind_id), Value::String(cursor.to_rfc3339()))
            .await
    }

    /// Write every cursor of a batch in one store operation.
    pub async fn commit(&self, cursors: &HashMap<String, DateTime<Utc>>) -> SyncResult<usize> {
        if cursors.is_empty() {
            return Ok(0);
        }
        let entries = cursors
            .iter()
            .map(|(kind, ts)| (Self::key(kind), Value::String(ts.to_rfc3339())))
            .collect::<Vec<_>>();
        let n = entries.len();
        self.store.set_many(entries).await?;
        Ok(n)
    }

    pub async fn checkpoint(&self, kind_id: &str) -> SyncResult<Option<SyncCheckpoint>> {
        Ok(self.read(kind_id).await?.map(|cursor| SyncCheckpoint {
            kind_id: kind_id.to_string(),
            cursor,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    #[tokio::test]
    async fn read_absent_is_none() {
        let store = CheckpointStore::new(Arc::new(MemoryStore::new()));
        assert!(store.read("HKQuantityTypeIdentifierStepCount").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_then_read() {
        let kv = Arc::new(MemoryStore::new());
        let store = CheckpointStore::new(kv.clone());
        let ts = Utc.with_ymd_and_hms(2024, 2, 1, 12, 30, 0).unwrap();
        store.write("k", ts).await.unwrap();
        assert_eq!(store.read("k").await.unwrap(), Some(ts));
        assert!(kv.snapshot().await.contains_key("anchor_k"));
        assert_eq!(
            store.checkpoint("k").await.unwrap(),
            Some(SyncCheckpoint {
                kind_id: "k".into(),
                cursor: ts
            })
        );
    }

    #[tokio::test]
    async fn commit_writes_all_cursors() {
        let store = CheckpointStore::new(Arc::new(MemoryStore::new()));
        let ts = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let cursors: HashMap<String, DateTime<Utc>> =
            ["a", "b", "c"].iter().map(|k| (k.to_string(), ts)).collect();
        assert_eq!(store.commit(&cursors).await.unwrap(), 3);
        for k in ["a", "b", "c"] {
            assert_eq!(store.read(k).await.unwrap(), Some(ts));
        }
    }

    #[tokio::test]
    async fn garbage_value_reads_as_absent() {
        let kv = Arc::new(MemoryStore::new());
        kv.set("anchor_k", Value::String("yesterday".into())).await.unwrap();
        let store = CheckpointStore::new(kv);
        assert!(store.read("k").await.unwrap().is_none());
    }
}
