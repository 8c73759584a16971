//! Registry of named multi-layer caches
//!
//! [`MultiLayerCacheManager::get_cache`] builds a [`MultiLayerCache`] the first time a
//! name is requested, from the L1 and L2 providers plus the shared resolver and
//! strategy, and returns the same instance afterwards.

pub mod multi_layer;

pub use multi_layer::MultiLayerCache;

use crate::backend::{DiskCacheProvider, LocalCacheProvider};
use crate::config::LayerCacheConfig;
use crate::core::{CacheError, CacheKey, CacheProvider, Result};
use crate::metrics::CacheMetrics;
use crate::resolver::AccessResolver;
use crate::strategy::{CacheAside, StrategyHandle, build_strategy};
use dashmap::DashMap;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info};

pub type ProviderHandle<K> = Arc<dyn CacheProvider<K>>;

pub struct MultiLayerCacheManager<K: CacheKey> {
    l1: ProviderHandle<K>,
    l2: Option<ProviderHandle<K>>,
    resolver: Arc<AccessResolver<K>>,
    strategy: StrategyHandle<K>,
    metrics: Arc<CacheMetrics>,
    allow_null_values: bool,
    caches: DashMap<String, Arc<MultiLayerCache<K>>>,
}

impl<K: CacheKey> MultiLayerCacheManager<K> {
    pub fn builder() -> MultiLayerCacheManagerBuilder<K> {
        MultiLayerCacheManagerBuilder::default()
    }

    /// Cache for `name`, created on first request.
    ///
    /// Concurrent first requests for one name construct it once.
    pub fn get_cache(&self, name: &str) -> Arc<MultiLayerCache<K>> {
        if let Some(cache) = self.caches.get(name) {
            return Arc::clone(cache.value());
        }

        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(self.create_cache(name)))
            .clone()
    }

    /// Names of the caches created so far, sorted
    pub fn get_cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn resolver(&self) -> &Arc<AccessResolver<K>> {
        &self.resolver
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Stop the shared strategy; write-behind drains its queue here
    pub async fn shutdown(&self) {
        info!(strategy = self.strategy.name(), "Shutting down cache manager");
        self.strategy.shutdown().await;
    }

    fn create_cache(&self, name: &str) -> MultiLayerCache<K> {
        let l1 = self.l1.cache(name);
        let l2 = self.l2.as_ref().and_then(|provider| provider.cache(name));

        debug!(
            cache = %name,
            l1 = l1.is_some(),
            l2 = l2.is_some(),
            strategy = self.strategy.name(),
            "Creating multi-layer cache"
        );

        MultiLayerCache::new(
            name,
            l1,
            l2,
            Arc::clone(&self.strategy),
            Arc::clone(&self.resolver),
            Arc::clone(&self.metrics),
            self.allow_null_values,
        )
    }
}

impl<K: CacheKey + Display> MultiLayerCacheManager<K> {
    /// Wire local and disk tiers, resolver and strategy from configuration, reporting to
    /// the process-wide metrics
    pub fn from_config(config: &LayerCacheConfig) -> Result<Self> {
        Self::from_config_with_metrics(config, CacheMetrics::global())
    }

    pub fn from_config_with_metrics(
        config: &LayerCacheConfig,
        metrics: Arc<CacheMetrics>,
    ) -> Result<Self> {
        config.validate()?;

        let mut builder = Self::builder()
            .l1_provider(Arc::new(LocalCacheProvider::new(
                config.l1.clone(),
                Arc::clone(&metrics),
            )))
            .resolver(Arc::new(AccessResolver::new(config.resolver.clone())))
            .strategy(build_strategy(&config.strategy, Arc::clone(&metrics))?)
            .metrics(Arc::clone(&metrics))
            .allow_null_values(config.allow_null_values);

        if let Some(l2) = &config.l2 {
            builder = builder.l2_provider(Arc::new(DiskCacheProvider::new(
                l2.clone(),
                Arc::clone(&metrics),
            )));
        }

        let manager = builder.build()?;
        info!(
            strategy = manager.strategy_name(),
            l2 = config.l2.is_some(),
            "Cache manager ready"
        );
        Ok(manager)
    }
}

pub struct MultiLayerCacheManagerBuilder<K: CacheKey> {
    l1: Option<ProviderHandle<K>>,
    l2: Option<ProviderHandle<K>>,
    resolver: Option<Arc<AccessResolver<K>>>,
    strategy: Option<StrategyHandle<K>>,
    metrics: Option<Arc<CacheMetrics>>,
    allow_null_values: bool,
}

impl<K: CacheKey> Default for MultiLayerCacheManagerBuilder<K> {
    fn default() -> Self {
        Self {
            l1: None,
            l2: None,
            resolver: None,
            strategy: None,
            metrics: None,
            allow_null_values: false,
        }
    }
}

impl<K: CacheKey> MultiLayerCacheManagerBuilder<K> {
    pub fn l1_provider(mut self, provider: ProviderHandle<K>) -> Self {
        self.l1 = Some(provider);
        self
    }

    /// Leave unset for L1-only operation
    pub fn l2_provider(mut self, provider: ProviderHandle<K>) -> Self {
        self.l2 = Some(provider);
        self
    }

    pub fn resolver(mut self, resolver: Arc<AccessResolver<K>>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn strategy(mut self, strategy: StrategyHandle<K>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn allow_null_values(mut self, allow: bool) -> Self {
        self.allow_null_values = allow;
        self
    }

    /// Defaults: cache-aside, a default resolver and fresh metrics
    pub fn build(self) -> Result<MultiLayerCacheManager<K>> {
        let l1 = self
            .l1
            .ok_or_else(|| CacheError::Config("an L1 provider is required".into()))?;

        Ok(MultiLayerCacheManager {
            l1,
            l2: self.l2,
            resolver: self.resolver.unwrap_or_default(),
            strategy: self
                .strategy
                .unwrap_or_else(|| Arc::new(CacheAside::new()) as StrategyHandle<K>),
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(CacheMetrics::new())),
            allow_null_values: self.allow_null_values,
            caches: DashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{L2Config, StrategyKind};
    use crate::core::Cache;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_builder_requires_l1() {
        let result = MultiLayerCacheManager::<String>::builder().build();
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[tokio::test]
    async fn test_from_config_l1_only() {
        let manager: MultiLayerCacheManager<String> =
            MultiLayerCacheManager::from_config_with_metrics(
                &LayerCacheConfig::default(),
                Arc::new(CacheMetrics::new()),
            )
            .unwrap();

        let cache = manager.get_cache("users");
        assert!(cache.l1().is_some());
        assert!(cache.l2().is_none());
        assert_eq!(manager.strategy_name(), "cache-aside");

        cache.put(&"u1".to_string(), &json!("Alice")).await.unwrap();
        assert_eq!(
            cache.get(&"u1".to_string()).await.unwrap(),
            Some(json!("Alice"))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_from_config_with_disk_and_write_behind() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = LayerCacheConfig::default();
        config.l2 = Some(L2Config::with_directory(temp_dir.path()));
        config.strategy.kind = StrategyKind::WriteBehind;

        let metrics = Arc::new(CacheMetrics::new());
        let manager: MultiLayerCacheManager<String> =
            MultiLayerCacheManager::from_config_with_metrics(&config, metrics).unwrap();
        assert_eq!(manager.strategy_name(), "write-behind");

        let cache = manager.get_cache("orders");
        let key = "o1".to_string();
        cache.put(&key, &json!({"total": 42})).await.unwrap();

        manager.shutdown().await;
        let l2 = cache.l2().unwrap();
        assert_eq!(l2.get(&key).await.unwrap(), Some(json!({"total": 42})));
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let mut config = LayerCacheConfig::default();
        config.l1.max_entries = 0;
        let result = MultiLayerCacheManager::<String>::from_config_with_metrics(
            &config,
            Arc::new(CacheMetrics::new()),
        );
        assert!(result.is_err());
    }
}
