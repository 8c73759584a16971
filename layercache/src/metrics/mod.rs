//! Prometheus Metrics for layercache
//!
//! Counters and timers recorded by the multi-layer read path, the tiers and the
//! write-behind pipeline:
//! - Requests per cache, layer and result (hit/miss)
//! - Evictions per cache, layer and cause
//! - Tier access latency
//! - L2 → L1 promotions
//! - Write-behind queue depth and drained operation outcomes

use crate::core::{EvictionCause, Tier};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

lazy_static! {
    static ref GLOBAL_METRICS: Arc<CacheMetrics> = Arc::new(CacheMetrics::new());
}

/// Per-cache view over the request counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub promotions: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.l1_hits + self.l2_hits
    }

    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

/// Metric sink shared by every cache built from one manager
pub struct CacheMetrics {
    registry: Registry,
    requests: IntCounterVec,
    evictions: IntCounterVec,
    access_duration: HistogramVec,
    promotions: IntCounterVec,
    queue_depth: IntGauge,
    write_behind_ops: IntCounterVec,
    caches: RwLock<BTreeSet<String>>,
}

impl CacheMetrics {
    /// Create a metric set on its own registry
    pub fn new() -> Self {
        Self::try_new().expect("static metric definitions are valid")
    }

    fn try_new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("cache_requests_total", "Cache lookups by cache, layer and result"),
            &["cache", "layer", "result"],
        )?;
        let evictions = IntCounterVec::new(
            Opts::new("cache_evictions_total", "Entries removed by cache, layer and cause"),
            &["cache", "layer", "cause"],
        )?;
        let access_duration = HistogramVec::new(
            HistogramOpts::new(
                "cache_access_duration_seconds",
                "Tier access latency in seconds",
            )
            .buckets(vec![0.00001, 0.0001, 0.001, 0.01, 0.1, 1.0]),
            &["cache", "layer"],
        )?;
        let promotions = IntCounterVec::new(
            Opts::new("cache_promotions_total", "Values copied from L2 into L1"),
            &["cache"],
        )?;
        let queue_depth = IntGauge::new(
            "cache_write_behind_queue_depth",
            "Operations waiting in the write-behind queue",
        )?;
        let write_behind_ops = IntCounterVec::new(
            Opts::new(
                "cache_write_behind_operations_total",
                "Write-behind operations applied to L2 by type and status",
            ),
            &["operation", "status"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(evictions.clone()))?;
        registry.register(Box::new(access_duration.clone()))?;
        registry.register(Box::new(promotions.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(write_behind_ops.clone()))?;

        Ok(Self {
            registry,
            requests,
            evictions,
            access_duration,
            promotions,
            queue_depth,
            write_behind_ops,
            caches: RwLock::new(BTreeSet::new()),
        })
    }

    /// Process-wide instance used when no sink is supplied
    pub fn global() -> Arc<CacheMetrics> {
        Arc::clone(&GLOBAL_METRICS)
    }

    fn track(&self, cache: &str) {
        if !self.caches.read().contains(cache) {
            self.caches.write().insert(cache.to_string());
        }
    }

    /// Record a lookup against one tier
    pub fn record_request(&self, cache: &str, tier: Tier, hit: bool) {
        self.track(cache);
        let result = if hit { "hit" } else { "miss" };
        self.requests
            .with_label_values(&[cache, tier.label(), result])
            .inc();
    }

    /// Record tier access latency
    pub fn observe_access(&self, cache: &str, tier: Tier, elapsed: Duration) {
        self.access_duration
            .with_label_values(&[cache, tier.label()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_promotion(&self, cache: &str) {
        self.track(cache);
        self.promotions.with_label_values(&[cache]).inc();
    }

    pub fn record_eviction(&self, cache: &str, tier: Tier, cause: EvictionCause) {
        self.track(cache);
        self.evictions
            .with_label_values(&[cache, tier.label(), cause.label()])
            .inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.get()
    }

    /// Record the outcome of one drained write-behind operation
    pub fn record_write_behind(&self, operation: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.write_behind_ops
            .with_label_values(&[operation, status])
            .inc();
    }

    pub fn write_behind_count(&self, operation: &str, success: bool) -> u64 {
        let status = if success { "success" } else { "failure" };
        self.write_behind_ops
            .with_label_values(&[operation, status])
            .get()
    }

    /// Snapshot of the counters for one cache
    pub fn stats(&self, cache: &str) -> CacheStats {
        let count = |tier: Tier, result: &str| {
            self.requests
                .with_label_values(&[cache, tier.label(), result])
                .get()
        };
        let l1_hits = count(Tier::L1, "hit");
        let l1_misses = count(Tier::L1, "miss");
        let l2_hits = count(Tier::L2, "hit");

        let evictions = [Tier::L1, Tier::L2]
            .iter()
            .flat_map(|tier| {
                [
                    EvictionCause::Explicit,
                    EvictionCause::Size,
                    EvictionCause::Expired,
                    EvictionCause::Clear,
                ]
                .map(|cause| {
                    self.evictions
                        .with_label_values(&[cache, tier.label(), cause.label()])
                        .get()
                })
            })
            .sum();

        CacheStats {
            l1_hits,
            l2_hits,
            // every L2 lookup follows an L1 miss
            misses: l1_misses.saturating_sub(l2_hits),
            evictions,
            promotions: self.promotions.with_label_values(&[cache]).get(),
        }
    }

    /// Names of caches that have recorded anything
    pub fn cache_names(&self) -> Vec<String> {
        self.caches.read().iter().cloned().collect()
    }

    /// Hit ratio across every tracked cache
    pub fn overall_hit_ratio(&self) -> f64 {
        let (hits, total) = self
            .cache_names()
            .iter()
            .map(|name| self.stats(name))
            .fold((0u64, 0u64), |(hits, total), stats| {
                (hits + stats.hits(), total + stats.hits() + stats.misses)
            });

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Encode all metrics to Prometheus text format
    pub fn encode(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}
