//! Shared test doubles
#![allow(dead_code)]

use async_trait::async_trait;
use layercache::{
    AccessResolver, Cache, CacheError, CacheHandle, CacheMetrics, CacheProvider, CacheValue,
    MultiLayerCacheManager, Result, StrategyHandle,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory tier that counts every call and can be told to fail
pub struct RecordingCache {
    name: String,
    data: Mutex<HashMap<String, CacheValue>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
    evicts: AtomicUsize,
    clears: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    /// Keys whose puts fail even when writes are otherwise healthy
    fail_keys: Mutex<HashSet<String>>,
    /// Keys whose puts stall before landing
    slow_keys: Mutex<HashMap<String, Duration>>,
}

impl RecordingCache {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            data: Mutex::new(HashMap::new()),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            evicts: AtomicUsize::new(0),
            clears: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_keys: Mutex::new(HashSet::new()),
            slow_keys: Mutex::new(HashMap::new()),
        })
    }

    /// A tier whose every operation fails
    pub fn failing(name: &str) -> Arc<Self> {
        let cache = Self::new(name);
        cache.set_fail_reads(true);
        cache.set_fail_writes(true);
        cache
    }

    pub fn handle(self: &Arc<Self>) -> CacheHandle<String> {
        Arc::clone(self) as CacheHandle<String>
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_puts_for(&self, key: &str) {
        self.fail_keys.lock().insert(key.to_string());
    }

    pub fn slow_puts_for(&self, key: &str, delay: Duration) {
        self.slow_keys.lock().insert(key.to_string(), delay);
    }

    /// Store without counting a call
    pub fn seed(&self, key: &str, value: CacheValue) {
        self.data.lock().insert(key.to_string(), value);
    }

    /// Read without counting a call
    pub fn peek(&self, key: &str) -> Option<CacheValue> {
        self.data.lock().get(key).cloned()
    }

    /// Remove without counting a call
    pub fn drop_key(&self, key: &str) {
        self.data.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn evicts(&self) -> usize {
        self.evicts.load(Ordering::SeqCst)
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    fn check_writes(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::backend(&self.name, "injected write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Cache<String> for RecordingCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &String) -> Result<Option<CacheValue>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::backend(&self.name, "injected read failure"));
        }
        Ok(self.data.lock().get(key).cloned())
    }

    async fn contains(&self, key: &String) -> Result<bool> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::backend(&self.name, "injected read failure"));
        }
        Ok(self.data.lock().contains_key(key))
    }

    async fn put(&self, key: &String, value: &CacheValue) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let delay = self.slow_keys.lock().get(key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_writes()?;
        if self.fail_keys.lock().contains(key) {
            return Err(CacheError::backend(&self.name, format!("injected failure for {key}")));
        }
        self.data.lock().insert(key.clone(), value.clone());
        Ok(())
    }

    async fn evict(&self, key: &String) -> Result<()> {
        self.evicts.fetch_add(1, Ordering::SeqCst);
        self.check_writes()?;
        self.data.lock().remove(key);
        Ok(())
    }

    async fn evict_if_present(&self, key: &String) -> Result<bool> {
        self.evicts.fetch_add(1, Ordering::SeqCst);
        self.check_writes()?;
        Ok(self.data.lock().remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.check_writes()?;
        self.data.lock().clear();
        Ok(())
    }

    async fn invalidate(&self) -> Result<bool> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.data.lock().clear();
        Ok(true)
    }
}

/// Provider handing out one [`RecordingCache`] per name, kept for inspection
#[derive(Default)]
pub struct RecordingProvider {
    tiers: Mutex<HashMap<String, Arc<RecordingCache>>>,
    created: AtomicUsize,
}

impl RecordingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The tier for `name`, created on first use
    pub fn tier(&self, name: &str) -> Arc<RecordingCache> {
        let mut tiers = self.tiers.lock();
        let tier = tiers.entry(name.to_string()).or_insert_with(|| {
            self.created.fetch_add(1, Ordering::SeqCst);
            RecordingCache::new(name)
        });
        Arc::clone(tier)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl CacheProvider<String> for RecordingProvider {
    fn cache(&self, name: &str) -> Option<CacheHandle<String>> {
        Some(self.tier(name).handle())
    }
}

/// Manager over two recording providers
pub struct Harness {
    pub manager: MultiLayerCacheManager<String>,
    pub l1: Arc<RecordingProvider>,
    pub l2: Arc<RecordingProvider>,
    pub metrics: Arc<CacheMetrics>,
}

impl Harness {
    pub fn new(strategy: StrategyHandle<String>) -> Self {
        Self::with_nulls(strategy, false)
    }

    pub fn with_nulls(strategy: StrategyHandle<String>, allow_null_values: bool) -> Self {
        let l1 = RecordingProvider::new();
        let l2 = RecordingProvider::new();
        let metrics = Arc::new(CacheMetrics::new());

        let manager = MultiLayerCacheManager::builder()
            .l1_provider(Arc::clone(&l1) as Arc<dyn CacheProvider<String>>)
            .l2_provider(Arc::clone(&l2) as Arc<dyn CacheProvider<String>>)
            .resolver(Arc::new(AccessResolver::default()))
            .strategy(strategy)
            .metrics(Arc::clone(&metrics))
            .allow_null_values(allow_null_values)
            .build()
            .unwrap();

        Self {
            manager,
            l1,
            l2,
            metrics,
        }
    }
}

pub fn key(s: &str) -> String {
    s.to_string()
}
