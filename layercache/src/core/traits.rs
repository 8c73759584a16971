use super::error::Result;
use super::types::{CacheKey, CacheValue};
use async_trait::async_trait;
use std::sync::Arc;

/// Minimal cache capability over one named keyspace.
///
/// Both tiers implement it, and so does the multi-layer facade built on top of them.
/// `get` returns `Ok(None)` for a miss and `Ok(Some(Value::Null))` for a stored null.
#[async_trait]
pub trait Cache<K: CacheKey>: Send + Sync {
    /// Name of the keyspace
    fn name(&self) -> &str;

    async fn get(&self, key: &K) -> Result<Option<CacheValue>>;

    async fn put(&self, key: &K, value: &CacheValue) -> Result<()>;

    async fn evict(&self, key: &K) -> Result<()>;

    /// Whether a live entry exists for `key`.
    ///
    /// Tiers should answer without touching recency, frequency or hit counters. The
    /// default falls back to `get`.
    async fn contains(&self, key: &K) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Evict and report whether the key was present
    async fn evict_if_present(&self, key: &K) -> Result<bool>;

    async fn clear(&self) -> Result<()>;

    /// Drop everything held by the underlying store, reporting whether it succeeded
    async fn invalidate(&self) -> Result<bool>;
}

/// Shared handle to a tier
pub type CacheHandle<K> = Arc<dyn Cache<K>>;

/// Source of per-name tier handles (one provider per tier)
pub trait CacheProvider<K: CacheKey>: Send + Sync {
    /// Handle for `name`, or `None` when this backend does not serve it
    fn cache(&self, name: &str) -> Option<CacheHandle<K>>;
}
