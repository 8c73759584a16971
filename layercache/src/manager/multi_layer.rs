use crate::core::{
    Cache, CacheError, CacheHandle, CacheKey, CacheOperation, CacheValue, EvictionCause,
    LoaderError, Result, Tier,
};
use crate::metrics::CacheMetrics;
use crate::resolver::AccessResolver;
use crate::strategy::StrategyHandle;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// One named cache composed of an L1 handle, an L2 handle and the shared strategy.
///
/// Reads are served here with per-tier timing: L1 hit, else L2 hit with promotion into
/// L1, else a miss. Writes and evictions go through the strategy. `clear` and
/// `invalidate` always act on both tiers directly.
pub struct MultiLayerCache<K: CacheKey> {
    name: String,
    l1: Option<CacheHandle<K>>,
    l2: Option<CacheHandle<K>>,
    strategy: StrategyHandle<K>,
    resolver: Arc<AccessResolver<K>>,
    metrics: Arc<CacheMetrics>,
    allow_null_values: bool,
    /// Per-key gates making `get_or_load` single-flight
    loads: DashMap<K, Arc<tokio::sync::Mutex<()>>>,
}

impl<K: CacheKey> MultiLayerCache<K> {
    pub fn new(
        name: impl Into<String>,
        l1: Option<CacheHandle<K>>,
        l2: Option<CacheHandle<K>>,
        strategy: StrategyHandle<K>,
        resolver: Arc<AccessResolver<K>>,
        metrics: Arc<CacheMetrics>,
        allow_null_values: bool,
    ) -> Self {
        Self {
            name: name.into(),
            l1,
            l2,
            strategy,
            resolver,
            metrics,
            allow_null_values,
            loads: DashMap::new(),
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn resolver(&self) -> &AccessResolver<K> {
        &self.resolver
    }

    pub fn l1(&self) -> Option<&CacheHandle<K>> {
        self.l1.as_ref()
    }

    pub fn l2(&self) -> Option<&CacheHandle<K>> {
        self.l2.as_ref()
    }

    /// Typed read. A stored value of the wrong shape is an error, not a miss.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &K) -> Result<Option<T>> {
        let Some(value) = self.get(key).await? else {
            return Ok(None);
        };

        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| CacheError::TypeMismatch {
                cache: self.name.clone(),
                key: format!("{key:?}"),
                expected: std::any::type_name::<T>(),
                reason: e.to_string(),
            })
    }

    /// Read, or compute and store on a miss.
    ///
    /// Concurrent misses on the same key share one loader call: later callers wait for
    /// the first and then find its value in the cache. A loader error is returned as
    /// [`CacheError::Retrieval`] and nothing is stored.
    pub async fn get_or_load<F, Fut>(&self, key: &K, loader: F) -> Result<CacheValue>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<CacheValue, LoaderError>> + Send,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let gate = self
            .loads
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        let result = {
            let _guard = gate.lock().await;
            // Re-check quietly, the miss was already counted above
            match self.read_tiers(key, false).await {
                Some(value) => Ok(value),
                None => self.load(key, loader).await,
            }
        };

        // Map entry plus our clone means nobody else is waiting
        self.loads
            .remove_if(key, |_, gate| Arc::strong_count(gate) <= 2);
        result
    }

    /// Store `value` only when nothing is cached for `key`.
    ///
    /// This is a read followed by a write, not a compare-and-swap: a concurrent writer can
    /// land between the two. Returns the existing value when there was one.
    pub async fn put_if_absent(
        &self,
        key: &K,
        value: &CacheValue,
    ) -> Result<Option<CacheValue>> {
        if let Some(existing) = self.get(key).await? {
            return Ok(Some(existing));
        }
        self.put(key, value).await?;
        Ok(None)
    }

    /// Preload entries through the strategy. Failures are logged and skipped.
    pub async fn warm<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (K, CacheValue)> + Send,
        I::IntoIter: Send,
    {
        let mut stored = 0usize;
        let mut failed = 0usize;

        for (key, value) in entries {
            match self.put(&key, &value).await {
                Ok(()) => stored += 1,
                Err(e) => {
                    failed += 1;
                    warn!(
                        cache = %self.name,
                        key = ?key,
                        error = %e,
                        "Cache warm-up entry skipped"
                    );
                }
            }
        }

        debug!(cache = %self.name, stored, failed, "Cache warmed");
        stored
    }

    async fn load<F, Fut>(&self, key: &K, loader: F) -> Result<CacheValue>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<CacheValue, LoaderError>> + Send,
    {
        let value = loader().await.map_err(|source| CacheError::Retrieval {
            cache: self.name.clone(),
            key: format!("{key:?}"),
            source,
        })?;

        if value.is_null() && !self.allow_null_values {
            debug!(cache = %self.name, key = ?key, "Loaded null value not cached");
            return Ok(value);
        }

        self.put(key, &value).await?;
        Ok(value)
    }

    /// Tier walk: L1, then L2 with promotion. Tier errors count as a miss.
    ///
    /// With `observe` set, each tier read is timed and recorded as a hit or a miss.
    async fn read_tiers(&self, key: &K, observe: bool) -> Option<CacheValue> {
        if let Some(value) = self
            .read_tier(Tier::L1, self.l1.as_ref(), key, observe)
            .await
        {
            debug!(cache = %self.name, key = ?key, "Cache hit in L1");
            return Some(value);
        }

        let value = self
            .read_tier(Tier::L2, self.l2.as_ref(), key, observe)
            .await?;
        debug!(cache = %self.name, key = ?key, "Cache hit in L2, promoting to L1");

        if let Some(l1) = &self.l1 {
            match l1.put(key, &value).await {
                Ok(()) => self.metrics.record_promotion(&self.name),
                Err(e) => {
                    warn!(cache = %self.name, key = ?key, error = %e, "Promotion into L1 failed")
                }
            }
        }
        Some(value)
    }

    async fn read_tier(
        &self,
        tier: Tier,
        handle: Option<&CacheHandle<K>>,
        key: &K,
        observe: bool,
    ) -> Option<CacheValue> {
        let handle = handle?;
        let start = Instant::now();
        let result = handle.get(key).await;
        if observe {
            self.metrics.observe_access(&self.name, tier, start.elapsed());
            let hit = matches!(result, Ok(Some(_)));
            self.metrics.record_request(&self.name, tier, hit);
        }

        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    cache = %self.name,
                    tier = %tier,
                    key = ?key,
                    error = %e,
                    "Error reading cache tier"
                );
                None
            }
        }
    }

    /// Tiers currently holding `key`, probed without touching their recency or stats
    async fn present_tiers(&self, key: &K) -> Vec<Tier> {
        let mut present = Vec::with_capacity(2);
        for (tier, handle) in [(Tier::L1, &self.l1), (Tier::L2, &self.l2)] {
            let Some(handle) = handle else {
                continue;
            };
            match handle.contains(key).await {
                Ok(true) => present.push(tier),
                Ok(false) => {}
                Err(e) => warn!(
                    cache = %self.name,
                    tier = %tier,
                    key = ?key,
                    error = %e,
                    "Presence check failed"
                ),
            }
        }
        present
    }
}

#[async_trait]
impl<K: CacheKey> Cache<K> for MultiLayerCache<K> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &K) -> Result<Option<CacheValue>> {
        let placement = self.resolver.resolve_cache(key, CacheOperation::Get);
        let value = self.read_tiers(key, true).await;
        if value.is_none() {
            debug!(cache = %self.name, key = ?key, ?placement, "Cache miss");
        }
        Ok(value)
    }

    async fn put(&self, key: &K, value: &CacheValue) -> Result<()> {
        if value.is_null() && !self.allow_null_values {
            return Err(CacheError::InvalidArgument(format!(
                "cache '{}' does not allow null values (key {key:?})",
                self.name
            )));
        }

        self.resolver.resolve_cache(key, CacheOperation::Put);
        self.strategy
            .put(key, value, self.l1.as_ref(), self.l2.as_ref())
            .await
    }

    async fn contains(&self, key: &K) -> Result<bool> {
        Ok(!self.present_tiers(key).await.is_empty())
    }

    async fn evict(&self, key: &K) -> Result<()> {
        self.evict_if_present(key).await.map(|_| ())
    }

    /// Evict through the strategy, recording an explicit eviction for each tier that held
    /// the key
    async fn evict_if_present(&self, key: &K) -> Result<bool> {
        self.resolver.resolve_cache(key, CacheOperation::Evict);
        let present = self.present_tiers(key).await;

        self.strategy
            .evict(key, self.l1.as_ref(), self.l2.as_ref())
            .await?;

        for tier in &present {
            self.metrics
                .record_eviction(&self.name, *tier, EvictionCause::Explicit);
        }
        debug!(cache = %self.name, key = ?key, tiers = present.len(), "Evicted key");
        Ok(!present.is_empty())
    }

    async fn clear(&self) -> Result<()> {
        let l1 = match &self.l1 {
            Some(l1) => l1.clear().await,
            None => Ok(()),
        };
        let l2 = match &self.l2 {
            Some(l2) => l2.clear().await,
            None => Ok(()),
        };

        for (tier, result) in [(Tier::L1, &l1), (Tier::L2, &l2)] {
            if result.is_ok() {
                self.metrics
                    .record_eviction(&self.name, tier, EvictionCause::Clear);
            }
        }
        debug!(cache = %self.name, "Cleared all cache layers");
        l1.and(l2)
    }

    async fn invalidate(&self) -> Result<bool> {
        let mut invalidated = true;
        for (tier, handle) in [(Tier::L1, &self.l1), (Tier::L2, &self.l2)] {
            let Some(handle) = handle else {
                continue;
            };
            match handle.invalidate().await {
                Ok(done) => invalidated &= done,
                Err(e) => {
                    invalidated = false;
                    warn!(
                        cache = %self.name,
                        tier = %tier,
                        error = %e,
                        "Tier invalidation failed"
                    );
                }
            }
        }
        Ok(invalidated)
    }
}
