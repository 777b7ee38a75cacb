use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{error, info};

use crate::error::Result;
use crate::kv::{KvEntry, KvStore};

/// In-process, lock-free KV store backed by `dashmap`, with a background
/// task that periodically snapshots the whole store to a JSON file for
/// crash recovery.
///
/// This is the "in-process map + periodic flush" backend: no database is
/// required to run Marcus, but a restart loses nothing newer than the last
/// flush interval.
pub struct MemoryKvStore {
    data: Arc<DashMap<(String, String), Value>>,
    snapshot_path: Option<PathBuf>,
    dirty: Arc<Notify>,
}

impl MemoryKvStore {
    /// Build a store with no snapshot persistence (pure in-memory, for tests).
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            snapshot_path: None,
            dirty: Arc::new(Notify::new()),
        }
    }

    /// Build a store that flushes a JSON snapshot to `snapshot_path` every
    /// `flush_interval`, and loads any existing snapshot at startup.
    pub async fn with_snapshot(snapshot_path: PathBuf, flush_interval: Duration) -> Result<Self> {
        let data: Arc<DashMap<(String, String), Value>> = Arc::new(DashMap::new());

        if let Ok(bytes) = tokio::fs::read(&snapshot_path).await {
            let loaded: HashMap<String, HashMap<String, Value>> = serde_json::from_slice(&bytes)?;
            for (collection, entries) in loaded {
                for (key, value) in entries {
                    data.insert((collection.clone(), key), value);
                }
            }
            info!(path = %snapshot_path.display(), "loaded kv snapshot");
        }

        let store = Self {
            data,
            snapshot_path: Some(snapshot_path),
            dirty: Arc::new(Notify::new()),
        };
        store.spawn_flush_task(flush_interval);
        Ok(store)
    }

    fn spawn_flush_task(&self, interval: Duration) {
        let Some(path) = self.snapshot_path.clone() else {
            return;
        };
        let data = self.data.clone();
        let dirty = self.dirty.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = dirty.notified() => {
                        tokio::time::sleep(interval).await;
                    }
                }
                if let Err(err) = flush_snapshot(&data, &path).await {
                    error!(error = %err, "failed to flush kv snapshot");
                }
            }
        });
    }

    fn mark_dirty(&self) {
        self.dirty.notify_one();
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn flush_snapshot(data: &DashMap<(String, String), Value>, path: &PathBuf) -> Result<()> {
    let mut grouped: HashMap<String, HashMap<String, Value>> = HashMap::new();
    for entry in data.iter() {
        let (collection, key) = entry.key().clone();
        grouped
            .entry(collection)
            .or_default()
            .insert(key, entry.value().clone());
    }
    let bytes = serde_json::to_vec_pretty(&grouped)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait::async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .data
            .get(&(collection.to_owned(), key.to_owned()))
            .map(|v| v.clone()))
    }

    async fn put(&self, collection: &str, key: &str, value: Value) -> Result<()> {
        self.data
            .insert((collection.to_owned(), key.to_owned()), value);
        self.mark_dirty();
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        self.data.remove(&(collection.to_owned(), key.to_owned()));
        self.mark_dirty();
        Ok(())
    }

    async fn scan(&self, collection: &str) -> Result<Vec<KvEntry>> {
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .map(|entry| KvEntry {
                collection: entry.key().0.clone(),
                key: entry.key().1.clone(),
                value: entry.value().clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = MemoryKvStore::new();
        store
            .put("agent_profile", "a1", json!({"skill": "rust"}))
            .await
            .unwrap();
        let got = store.get("agent_profile", "a1").await.unwrap();
        assert_eq!(got, Some(json!({"skill": "rust"})));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("agent_profile", "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let store = MemoryKvStore::new();
        store.put("decisions", "d1", json!(1)).await.unwrap();
        store.delete("decisions", "d1").await.unwrap();
        assert_eq!(store.get("decisions", "d1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scan_filters_by_collection() {
        let store = MemoryKvStore::new();
        store.put("artifacts", "x", json!(1)).await.unwrap();
        store.put("artifacts", "y", json!(2)).await.unwrap();
        store.put("decisions", "z", json!(3)).await.unwrap();

        let artifacts = store.scan("artifacts").await.unwrap();
        assert_eq!(artifacts.len(), 2);
        assert!(artifacts.iter().all(|e| e.collection == "artifacts"));
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        let store = MemoryKvStore::with_snapshot(path.clone(), Duration::from_millis(10))
            .await
            .unwrap();
        store.put("task_outcome", "t1", json!({"ok": true})).await.unwrap();
        flush_snapshot(&store.data, &path).await.unwrap();

        let reloaded = MemoryKvStore::with_snapshot(path, Duration::from_secs(3600))
            .await
            .unwrap();
        let got = reloaded.get("task_outcome", "t1").await.unwrap();
        assert_eq!(got, Some(json!({"ok": true})));
    }
}
