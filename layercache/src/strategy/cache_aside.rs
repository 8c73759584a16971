use super::{CacheStrategy, log_failure, read_through};
use crate::core::{CacheHandle, CacheKey, CacheValue, Result, Tier};
use async_trait::async_trait;
use tracing::debug;

const NAME: &str = "cache-aside";

/// Lazy tiering: sequential best-effort writes, tier failures never reach the caller
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheAside;

impl CacheAside {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<K: CacheKey> CacheStrategy<K> for CacheAside {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn put(
        &self,
        key: &K,
        value: &CacheValue,
        l1: Option<&CacheHandle<K>>,
        l2: Option<&CacheHandle<K>>,
    ) -> Result<()> {
        if let Some(l1) = l1 {
            log_failure(NAME, Tier::L1, "put", key, l1.put(key, value).await);
        }
        if let Some(l2) = l2 {
            log_failure(NAME, Tier::L2, "put", key, l2.put(key, value).await);
        }
        debug!(strategy = NAME, key = ?key, "Stored value");
        Ok(())
    }

    async fn get(
        &self,
        key: &K,
        l1: Option<&CacheHandle<K>>,
        l2: Option<&CacheHandle<K>>,
    ) -> Result<Option<CacheValue>> {
        Ok(read_through(NAME, key, l1, l2).await)
    }

    async fn evict(
        &self,
        key: &K,
        l1: Option<&CacheHandle<K>>,
        l2: Option<&CacheHandle<K>>,
    ) -> Result<()> {
        if let Some(l1) = l1 {
            log_failure(NAME, Tier::L1, "evict", key, l1.evict(key).await);
        }
        if let Some(l2) = l2 {
            log_failure(NAME, Tier::L2, "evict", key, l2.evict(key).await);
        }
        Ok(())
    }
}
