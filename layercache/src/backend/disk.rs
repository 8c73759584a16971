//! L2 Disk Cache
//!
//! Shared, file-backed tier used as the slower second level. Each cache name owns a
//! directory with an append-only data file and a JSON index; values are stored as JSON.
//! Keys are rendered with `Display` and namespaced as `<cache>::<key>`.

use crate::config::L2Config;
use crate::core::{
    Cache, CacheError, CacheHandle, CacheKey, CacheProvider, CacheValue, EvictionCause, Result,
    Tier,
};
use crate::metrics::CacheMetrics;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

const DATA_FILE: &str = "cache.dat";
const INDEX_FILE: &str = "index.json";
const COMPACT_FILE: &str = "cache.dat.compact";
const INDEX_SAVE_EVERY: u64 = 100;
/// Dead bytes tolerated before compaction is considered at all
const COMPACT_MIN_DEAD_BYTES: u64 = 4096;

/// L2 cache entry metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskEntry {
    offset: u64,
    size: u64,
    /// Unix seconds, `None` for no expiry
    expires_at: Option<u64>,
    frequency: u32,
}

impl DiskEntry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }
}

struct DiskState {
    index: HashMap<String, DiskEntry>,
    data_file: File,
    end_offset: u64,
    live_bytes: u64,
    writes_since_save: u64,
}

/// File-backed L2 tier for one cache name
pub struct DiskCache<K> {
    name: String,
    directory: PathBuf,
    ttl: Option<Duration>,
    max_entries: usize,
    max_bytes: u64,
    state: Mutex<DiskState>,
    metrics: Arc<CacheMetrics>,
    _key: PhantomData<fn(K)>,
}

impl<K: CacheKey + Display> DiskCache<K> {
    /// Create or open the tier stored under `directory`
    pub fn open(
        name: impl Into<String>,
        directory: impl Into<PathBuf>,
        ttl: Option<Duration>,
        max_entries: usize,
        max_size_mb: usize,
        metrics: Arc<CacheMetrics>,
    ) -> Result<Self> {
        let name = name.into();
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let data_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(directory.join(DATA_FILE))?;

        let index = Self::load_index(&directory)?;
        let end_offset = data_file.metadata().map(|m| m.len()).unwrap_or(0);
        let live_bytes = index.values().map(|entry| entry.size).sum();

        info!(
            cache = %name,
            directory = %directory.display(),
            entries = index.len(),
            "L2 disk cache opened"
        );

        Ok(Self {
            name,
            directory,
            ttl,
            max_entries,
            max_bytes: (max_size_mb as u64) * 1024 * 1024,
            state: Mutex::new(DiskState {
                index,
                data_file,
                end_offset,
                live_bytes,
                writes_since_save: 0,
            }),
            metrics,
            _key: PhantomData,
        })
    }

    /// Load index from disk
    fn load_index(directory: &Path) -> Result<HashMap<String, DiskEntry>> {
        let index_path = directory.join(INDEX_FILE);

        if !index_path.exists() {
            return Ok(HashMap::new());
        }

        let contents = fs::read_to_string(&index_path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn save_index(&self, state: &DiskState) -> Result<()> {
        let json = serde_json::to_string(&state.index)?;
        fs::write(self.directory.join(INDEX_FILE), json)?;
        Ok(())
    }

    /// Persist the index now
    pub fn flush_index(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.writes_since_save = 0;
        self.save_index(&state)
    }

    /// Expiry applied to new entries
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn storage_key(&self, key: &K) -> String {
        format!("{}::{}", self.name, key)
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Evict least frequently used entry
    fn evict_lfu(&self, state: &mut DiskState) {
        let evict_key = state
            .index
            .iter()
            .min_by_key(|(_, entry)| entry.frequency)
            .map(|(key, _)| key.clone());

        let Some(key) = evict_key else {
            return;
        };
        if let Some(entry) = state.index.remove(&key) {
            state.live_bytes = state.live_bytes.saturating_sub(entry.size);
            self.metrics
                .record_eviction(&self.name, Tier::L2, EvictionCause::Size);
            debug!(cache = %self.name, key = %key, "L2 evicted (capacity)");
        }
    }

    fn read_entry(state: &mut DiskState, entry: &DiskEntry) -> Result<Vec<u8>> {
        state.data_file.seek(SeekFrom::Start(entry.offset))?;
        let mut buffer = vec![0u8; entry.size as usize];
        state.data_file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn remove(&self, key: &K) -> Result<bool> {
        let storage_key = self.storage_key(key);
        let mut state = self.state.lock();
        match state.index.remove(&storage_key) {
            Some(entry) => {
                state.live_bytes = state.live_bytes.saturating_sub(entry.size);
                self.note_write(&mut state)?;
                self.maybe_compact(&mut state);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn note_write(&self, state: &mut DiskState) -> Result<()> {
        state.writes_since_save += 1;
        if state.writes_since_save >= INDEX_SAVE_EVERY {
            state.writes_since_save = 0;
            self.save_index(state)?;
        }
        Ok(())
    }

    /// Compact once dead bytes outweigh live ones. Failures leave the old file in place.
    fn maybe_compact(&self, state: &mut DiskState) {
        let dead = state.end_offset.saturating_sub(state.live_bytes);
        if dead < COMPACT_MIN_DEAD_BYTES || dead <= state.live_bytes {
            return;
        }
        if let Err(e) = self.compact(state) {
            warn!(cache = %self.name, error = %e, "L2 compaction failed");
        }
    }

    /// Rewrite live entries into a fresh data file and swap it in
    fn compact(&self, state: &mut DiskState) -> Result<()> {
        let before = state.end_offset;
        let now = Self::now();
        let compact_path = self.directory.join(COMPACT_FILE);
        let mut fresh = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&compact_path)?;

        let mut live: Vec<(String, DiskEntry)> = state
            .index
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        live.sort_by_key(|(_, entry)| entry.offset);

        let mut offset = 0u64;
        let mut index = HashMap::with_capacity(live.len());
        for (key, mut entry) in live {
            let bytes = Self::read_entry(state, &entry)?;
            fresh.write_all(&bytes)?;
            entry.offset = offset;
            offset += entry.size;
            index.insert(key, entry);
        }
        fresh.flush()?;
        fs::rename(&compact_path, self.directory.join(DATA_FILE))?;

        state.data_file = fresh;
        state.index = index;
        state.end_offset = offset;
        state.live_bytes = offset;
        state.writes_since_save = 0;
        self.save_index(state)?;

        debug!(cache = %self.name, before, after = offset, "L2 data file compacted");
        Ok(())
    }

    fn truncate(&self) -> Result<usize> {
        let mut state = self.state.lock();
        let count = state.index.len();
        state.index.clear();
        state.end_offset = 0;
        state.live_bytes = 0;
        state.data_file.set_len(0)?;
        state.writes_since_save = 0;
        self.save_index(&state)?;
        Ok(count)
    }
}

#[async_trait]
impl<K: CacheKey + Display> Cache<K> for DiskCache<K> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &K) -> Result<Option<CacheValue>> {
        let storage_key = self.storage_key(key);
        let mut state = self.state.lock();

        let Some(entry) = state.index.get(&storage_key).cloned() else {
            return Ok(None);
        };

        if entry.is_expired(Self::now()) {
            state.index.remove(&storage_key);
            state.live_bytes = state.live_bytes.saturating_sub(entry.size);
            self.metrics
                .record_eviction(&self.name, Tier::L2, EvictionCause::Expired);
            return Ok(None);
        }

        let bytes = Self::read_entry(&mut state, &entry)?;
        if let Some(e) = state.index.get_mut(&storage_key) {
            e.frequency = e.frequency.saturating_add(1);
        }

        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn put(&self, key: &K, value: &CacheValue) -> Result<()> {
        let storage_key = self.storage_key(key);
        let bytes = serde_json::to_vec(value)?;
        let size = bytes.len() as u64;

        if size > self.max_bytes {
            return Err(CacheError::backend(
                &self.name,
                format!("value of {size} bytes exceeds L2 capacity"),
            ));
        }

        let mut state = self.state.lock();

        if let Some(previous) = state.index.remove(&storage_key) {
            state.live_bytes = state.live_bytes.saturating_sub(previous.size);
        }

        while !state.index.is_empty()
            && (state.live_bytes + size > self.max_bytes
                || state.index.len() >= self.max_entries)
        {
            self.evict_lfu(&mut state);
        }

        let offset = state.end_offset;
        state.data_file.seek(SeekFrom::Start(offset))?;
        state.data_file.write_all(&bytes)?;
        state.data_file.flush()?;

        state.end_offset += size;
        state.live_bytes += size;
        state.index.insert(
            storage_key,
            DiskEntry {
                offset,
                size,
                expires_at: self.ttl.map(|ttl| Self::now() + ttl.as_secs()),
                frequency: 1,
            },
        );

        self.note_write(&mut state)?;
        self.maybe_compact(&mut state);
        Ok(())
    }

    async fn contains(&self, key: &K) -> Result<bool> {
        let state = self.state.lock();
        Ok(state
            .index
            .get(&self.storage_key(key))
            .is_some_and(|entry| !entry.is_expired(Self::now())))
    }

    async fn evict(&self, key: &K) -> Result<()> {
        self.remove(key).map(|_| ())
    }

    async fn evict_if_present(&self, key: &K) -> Result<bool> {
        self.remove(key)
    }

    async fn clear(&self) -> Result<()> {
        let count = self.truncate()?;
        debug!(cache = %self.name, entries = count, "L2 cleared");
        Ok(())
    }

    async fn invalidate(&self) -> Result<bool> {
        self.truncate()?;
        Ok(true)
    }
}

impl<K> Drop for DiskCache<K> {
    fn drop(&mut self) {
        let state = self.state.lock();
        let json = match serde_json::to_string(&state.index) {
            Ok(json) => json,
            Err(e) => {
                warn!(cache = %self.name, error = %e, "Failed to serialize L2 index");
                return;
            }
        };
        if let Err(e) = fs::write(self.directory.join(INDEX_FILE), json) {
            warn!(cache = %self.name, error = %e, "Failed to persist L2 index");
        }
    }
}

/// Hands out one [`DiskCache`] per cache name under the configured directory
pub struct DiskCacheProvider<K> {
    config: L2Config,
    metrics: Arc<CacheMetrics>,
    caches: DashMap<String, Arc<DiskCache<K>>>,
}

impl<K: CacheKey + Display> DiskCacheProvider<K> {
    pub fn new(config: L2Config, metrics: Arc<CacheMetrics>) -> Self {
        Self {
            config,
            metrics,
            caches: DashMap::new(),
        }
    }

    /// Typed access to a disk tier, opening it if needed
    pub fn disk(&self, name: &str) -> Result<Arc<DiskCache<K>>> {
        let cache = match self.caches.entry(name.to_string()) {
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                let cache = Arc::new(DiskCache::open(
                    name,
                    self.config.directory.join(name),
                    self.config.ttl_for(name),
                    self.config.max_entries,
                    self.config.max_size_mb,
                    Arc::clone(&self.metrics),
                )?);
                vacant.insert(Arc::clone(&cache));
                cache
            }
        };
        Ok(cache)
    }
}

impl<K: CacheKey + Display> CacheProvider<K> for DiskCacheProvider<K> {
    fn cache(&self, name: &str) -> Option<CacheHandle<K>> {
        match self.disk(name) {
            Ok(cache) => {
                let handle: CacheHandle<K> = cache;
                Some(handle)
            }
            Err(e) => {
                error!(cache = %name, error = %e, "L2 cache unavailable, running L1-only");
                None
            }
        }
    }
}
