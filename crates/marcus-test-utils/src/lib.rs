//! Shared test fixtures for Marcus's crates.
//!
//! Marcus's default backend is in-memory, so unlike the Postgres-testcontainers
//! harness this pack's teacher code uses, none of these helpers require a
//! running database. `memory_store` and `temp_conversation_log` are enough to
//! exercise the whole core end to end.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use marcus_db::{ConversationLog, KvStore, MemoryKvStore};
use tempfile::TempDir;

/// A ready-to-use, empty in-memory `KvStore`.
pub fn memory_store() -> Arc<dyn KvStore> {
    Arc::new(MemoryKvStore::new())
}

/// A `ConversationLog` writing into a fresh temporary directory, plus the
/// `TempDir` handle (drop it last, or the directory is removed).
pub fn temp_conversation_log() -> (ConversationLog, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let log = ConversationLog::new(dir.path().to_owned());
    (log, dir)
}

/// A clock whose `now()` is set by the test rather than the wall clock, so
/// lease expiry, renewal decay, and stuck detection can be exercised
/// deterministically without real sleeps.
#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("fake clock lock poisoned")
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.now.lock().expect("fake clock lock poisoned");
        *guard += delta;
    }

    pub fn set(&self, when: DateTime<Utc>) {
        let mut guard = self.now.lock().expect("fake clock lock poisoned");
        *guard = when;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

/// Path fragment fixtures live under, kept alive for the duration of a test.
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("failed to create temp dir")
}

pub fn temp_dir_path() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().to_owned();
    (dir, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_is_usable() {
        let store = memory_store();
        store
            .put("agent_profile", "a1", serde_json::json!({"ok": true}))
            .await
            .unwrap();
        assert_eq!(
            store.get("agent_profile", "a1").await.unwrap(),
            Some(serde_json::json!({"ok": true}))
        );
    }

    #[test]
    fn fake_clock_advances() {
        let start = Utc::now();
        let clock = FakeClock::new(start);
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(30));
    }
}
