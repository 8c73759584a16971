use crate::config::L1Config;
use crate::core::{
    Cache, CacheHandle, CacheKey, CacheProvider, CacheValue, EvictionCause, Result, StoredEntry,
    Tier,
};
use crate::metrics::CacheMetrics;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// In-process L1 tier: bounded LRU with expire-after-write TTL
pub struct LocalCache<K: CacheKey> {
    name: String,
    inner: RwLock<LruState<K>>,
    ttl: Option<Duration>,
    stats: RwLock<LocalCacheStats>,
    metrics: Arc<CacheMetrics>,
}

struct LruState<K> {
    data: HashMap<K, StoredEntry>,
    /// LRU ordering (most recent at back)
    lru_order: VecDeque<K>,
    max_entries: usize,
}

/// Local tier statistics
#[derive(Debug, Clone, Default)]
pub struct LocalCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl<K: CacheKey> LocalCache<K> {
    pub fn new(
        name: impl Into<String>,
        max_entries: usize,
        ttl: Option<Duration>,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(LruState {
                data: HashMap::new(),
                lru_order: VecDeque::new(),
                max_entries,
            }),
            ttl,
            stats: RwLock::new(LocalCacheStats::default()),
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> LocalCacheStats {
        let mut stats = self.stats.read().clone();
        stats.entries = self.len();
        stats
    }

    fn lookup(&self, key: &K) -> Option<CacheValue> {
        let mut l1 = self.inner.write();

        let expired = match l1.data.get(key) {
            Some(entry) => entry.is_expired(),
            None => {
                self.stats.write().misses += 1;
                return None;
            }
        };

        if expired {
            l1.data.remove(key);
            l1.lru_order.retain(|k| k != key);
            let mut stats = self.stats.write();
            stats.misses += 1;
            stats.evictions += 1;
            self.metrics
                .record_eviction(&self.name, Tier::L1, EvictionCause::Expired);
            debug!(cache = %self.name, key = ?key, "L1 entry expired");
            return None;
        }

        let value = l1.data.get_mut(key).map(|entry| {
            entry.touch();
            entry.value.clone()
        });

        // Move to back of LRU (most recent)
        l1.lru_order.retain(|k| k != key);
        l1.lru_order.push_back(key.clone());
        self.stats.write().hits += 1;

        value
    }

    fn store(&self, key: &K, value: &CacheValue) {
        let mut l1 = self.inner.write();

        if l1.data.contains_key(key) {
            l1.lru_order.retain(|k| k != key);
        }

        // Evict if at capacity
        while l1.data.len() >= l1.max_entries && !l1.data.contains_key(key) {
            let Some(evict_key) = l1.lru_order.pop_front() else {
                break;
            };
            if l1.data.remove(&evict_key).is_some() {
                self.stats.write().evictions += 1;
                self.metrics
                    .record_eviction(&self.name, Tier::L1, EvictionCause::Size);
                debug!(cache = %self.name, key = ?evict_key, "L1 evicted (capacity)");
            }
        }

        l1.data
            .insert(key.clone(), StoredEntry::new(value.clone(), self.ttl));
        l1.lru_order.push_back(key.clone());
    }

    fn remove(&self, key: &K) -> bool {
        let mut l1 = self.inner.write();
        let removed = l1.data.remove(key).is_some();
        if removed {
            l1.lru_order.retain(|k| k != key);
        }
        removed
    }

    fn remove_all(&self) -> usize {
        let mut l1 = self.inner.write();
        let count = l1.data.len();
        l1.data.clear();
        l1.lru_order.clear();
        count
    }
}

#[async_trait]
impl<K: CacheKey> Cache<K> for LocalCache<K> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &K) -> Result<Option<CacheValue>> {
        Ok(self.lookup(key))
    }

    async fn put(&self, key: &K, value: &CacheValue) -> Result<()> {
        self.store(key, value);
        Ok(())
    }

    async fn contains(&self, key: &K) -> Result<bool> {
        let l1 = self.inner.read();
        Ok(l1.data.get(key).is_some_and(|entry| !entry.is_expired()))
    }

    async fn evict(&self, key: &K) -> Result<()> {
        self.remove(key);
        Ok(())
    }

    async fn evict_if_present(&self, key: &K) -> Result<bool> {
        Ok(self.remove(key))
    }

    async fn clear(&self) -> Result<()> {
        let count = self.remove_all();
        debug!(cache = %self.name, entries = count, "L1 cleared");
        Ok(())
    }

    async fn invalidate(&self) -> Result<bool> {
        self.remove_all();
        Ok(true)
    }
}

/// Hands out one [`LocalCache`] per cache name, created on first request
pub struct LocalCacheProvider<K: CacheKey> {
    config: L1Config,
    metrics: Arc<CacheMetrics>,
    caches: DashMap<String, Arc<LocalCache<K>>>,
}

impl<K: CacheKey> LocalCacheProvider<K> {
    pub fn new(config: L1Config, metrics: Arc<CacheMetrics>) -> Self {
        Self {
            config,
            metrics,
            caches: DashMap::new(),
        }
    }

    /// Typed access to a local tier, creating it if needed
    pub fn local(&self, name: &str) -> Arc<LocalCache<K>> {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(
                    cache = %name,
                    max_entries = self.config.max_entries,
                    ttl_secs = self.config.ttl_secs,
                    "Creating L1 cache"
                );
                Arc::new(LocalCache::new(
                    name,
                    self.config.max_entries,
                    self.config.ttl(),
                    Arc::clone(&self.metrics),
                ))
            })
            .clone()
    }
}

impl<K: CacheKey> CacheProvider<K> for LocalCacheProvider<K> {
    fn cache(&self, name: &str) -> Option<CacheHandle<K>> {
        let handle: CacheHandle<K> = self.local(name);
        Some(handle)
    }
}
