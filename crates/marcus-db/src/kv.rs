use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A single stored record: the raw JSON value plus the collection/key pair
/// it lives under.
#[derive(Debug, Clone)]
pub struct KvEntry {
    pub collection: String,
    pub key: String,
    pub value: Value,
}

/// Pluggable `(collection, key) -> value` store.
///
/// Collections are free-form strings (`agent_profile`, `task_outcome`,
/// `project_snapshot`, `decisions`, `artifacts`, `assignments`); keys are
/// opaque strings scoped within a collection. Implementations are held as
/// `Arc<dyn KvStore>` so the rest of the core never knows which backend is
/// in play.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a single value, or `None` if absent.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    /// Insert or overwrite a value.
    async fn put(&self, collection: &str, key: &str, value: Value) -> Result<()>;

    /// Remove a value. Not an error if the key does not exist.
    async fn delete(&self, collection: &str, key: &str) -> Result<()>;

    /// List every entry in a collection. Order is not guaranteed.
    async fn scan(&self, collection: &str) -> Result<Vec<KvEntry>>;
}
