//! Access-pattern resolver
//!
//! Tracks per-key GET/PUT counts and recency and turns them into tier placement
//! (cold keys in L2, warm keys in both, hot keys in L1) and a TTL class. It never
//! touches a tier and never fails; a key with no record behaves as cold.

use crate::config::ResolverConfig;
use crate::core::{CacheKey, CacheLayer, CacheOperation, CacheValue};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Counters for one key
#[derive(Debug, Default)]
struct AccessPattern {
    access_count: AtomicU64,
    write_count: AtomicU64,
    /// Milliseconds since the resolver was created
    last_access_ms: AtomicU64,
    /// Logical clock value of the last touch, orders records for pruning
    last_touch: AtomicU64,
}

/// Read-only view of a key's access record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessSnapshot {
    pub access_count: u64,
    pub write_count: u64,
    pub last_access: Instant,
}

/// Decides tier placement and TTL per key from observed access frequency
pub struct AccessResolver<K: CacheKey> {
    config: ResolverConfig,
    patterns: DashMap<K, AccessPattern>,
    epoch: Instant,
    clock: AtomicU64,
    pruning: AtomicBool,
}

impl<K: CacheKey> AccessResolver<K> {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            patterns: DashMap::new(),
            epoch: Instant::now(),
            clock: AtomicU64::new(0),
            pruning: AtomicBool::new(false),
        }
    }

    /// Decide which tier(s) serve `operation` on `key`.
    ///
    /// GETs bump the access counter first; writes and invalidations always go to both tiers.
    pub fn resolve_cache(&self, key: &K, operation: CacheOperation) -> CacheLayer {
        match operation {
            CacheOperation::Get => {
                let count = self.touch(key, |pattern| {
                    pattern.access_count.fetch_add(1, Ordering::Relaxed) + 1
                });
                self.layer_for_get(count)
            }
            CacheOperation::Put => {
                self.touch(key, |pattern| {
                    pattern.write_count.fetch_add(1, Ordering::Relaxed) + 1
                });
                CacheLayer::Both
            }
            CacheOperation::Evict | CacheOperation::Clear => CacheLayer::Both,
        }
    }

    /// Whether a value is worth caching for `key`.
    ///
    /// Nulls and oversized values are rejected; a key seen exactly once is a one-shot read
    /// and is not cached. Keys with no record are accepted.
    pub fn should_cache(&self, key: &K, value: &CacheValue) -> bool {
        if value.is_null() || self.is_oversized(value) {
            return false;
        }

        self.patterns
            .get(key)
            .is_none_or(|pattern| pattern.access_count.load(Ordering::Relaxed) > 1)
    }

    /// TTL class for `key`: doubled for very hot keys, halved for rarely seen ones
    pub fn get_cache_ttl(&self, key: &K) -> Duration {
        let base = self.config.base_ttl_secs;
        let Some(count) = self
            .patterns
            .get(key)
            .map(|pattern| pattern.access_count.load(Ordering::Relaxed))
        else {
            return Duration::from_secs(base);
        };

        let secs = if count > self.config.long_ttl_threshold {
            base.saturating_mul(2)
        } else if count > self.config.short_ttl_threshold {
            base
        } else {
            base / 2
        };
        Duration::from_secs(secs)
    }

    pub fn pattern(&self, key: &K) -> Option<AccessSnapshot> {
        self.patterns.get(key).map(|pattern| AccessSnapshot {
            access_count: pattern.access_count.load(Ordering::Relaxed),
            write_count: pattern.write_count.load(Ordering::Relaxed),
            last_access: self.epoch
                + Duration::from_millis(pattern.last_access_ms.load(Ordering::Relaxed)),
        })
    }

    /// Number of keys with an access record
    pub fn tracked_keys(&self) -> usize {
        self.patterns.len()
    }

    fn layer_for_get(&self, access_count: u64) -> CacheLayer {
        if access_count > self.config.hot_threshold {
            CacheLayer::L1Only
        } else if access_count > self.config.warm_threshold {
            CacheLayer::Both
        } else {
            CacheLayer::L2Only
        }
    }

    fn is_oversized(&self, value: &CacheValue) -> bool {
        let limit = self.config.max_value_size;
        match value {
            CacheValue::String(s) => s.chars().count() > limit,
            CacheValue::Array(_) | CacheValue::Object(_) => serde_json::to_string(value)
                .map(|s| s.len() > limit)
                .unwrap_or(true),
            _ => false,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Apply `update` to the key's record, creating it on first sight
    fn touch(&self, key: &K, update: impl Fn(&AccessPattern) -> u64) -> u64 {
        let now = self.now_ms();
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        let mark = |pattern: &AccessPattern| {
            pattern.last_access_ms.store(now, Ordering::Relaxed);
            pattern.last_touch.fetch_max(tick, Ordering::Relaxed);
        };

        if let Some(pattern) = self.patterns.get(key) {
            mark(&pattern);
            return update(&pattern);
        }

        let result = {
            let pattern = self.patterns.entry(key.clone()).or_default();
            mark(&pattern);
            update(&pattern)
        };

        if self.patterns.len() > self.config.max_tracked_keys {
            self.prune();
        }
        result
    }

    /// Drop the least recently touched records down to 90% of the cap
    fn prune(&self) {
        if self
            .pruning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let target = self.config.max_tracked_keys * 9 / 10;
        let mut by_age: Vec<(K, u64)> = self
            .patterns
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().last_touch.load(Ordering::Relaxed),
                )
            })
            .collect();
        by_age.sort_by_key(|(_, last_touch)| *last_touch);

        let excess = by_age.len().saturating_sub(target);
        for (key, _) in by_age.into_iter().take(excess) {
            self.patterns.remove(&key);
        }

        debug!(
            removed = excess,
            remaining = self.patterns.len(),
            "Pruned access-pattern records"
        );
        self.pruning.store(false, Ordering::Release);
    }
}

impl<K: CacheKey> Default for AccessResolver<K> {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}
