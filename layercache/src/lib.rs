//! Tiered caching engine
//!
//! A per-name [`MultiLayerCache`] sits over a fast process-local L1 and a shared L2.
//! Reads try L1, fall back to L2 and promote hits into L1. Writes follow one of three
//! strategies ([`CacheAside`], [`WriteThrough`], [`WriteBehind`]) shared by every cache a
//! [`MultiLayerCacheManager`] hands out. An [`AccessResolver`] tracks per-key access
//! frequency to classify keys as cold, warm or hot.

pub mod backend;
pub mod config;
pub mod core;
pub mod manager;
pub mod metrics;
pub mod resolver;
pub mod strategy;

// Re-export commonly used types
pub use backend::{DiskCache, DiskCacheProvider, LocalCache, LocalCacheProvider};
pub use config::{
    L1Config, L2Config, LayerCacheConfig, LoggingConfig, ResolverConfig, StrategyConfig,
    StrategyKind, WriteBehindConfig,
};
pub use core::{
    Cache, CacheError, CacheHandle, CacheKey, CacheLayer, CacheOperation, CacheProvider,
    CacheValue, EvictionCause, LoaderError, Result, Tier,
};
pub use manager::{MultiLayerCache, MultiLayerCacheManager, MultiLayerCacheManagerBuilder};
pub use metrics::{CacheMetrics, CacheStats};
pub use resolver::{AccessResolver, AccessSnapshot};
pub use strategy::{
    CacheAside, CacheStrategy, StrategyHandle, WriteBehind, WriteThrough, build_strategy,
};
