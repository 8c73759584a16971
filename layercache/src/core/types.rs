use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Keys accepted by every tier: anything hashable, comparable and shareable across tasks.
///
/// There is no null key; the type system rules it out.
pub trait CacheKey: Hash + Eq + Clone + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Hash + Eq + Clone + Debug + Send + Sync + 'static {}

/// Opaque cached value. `Value::Null` is the explicit null.
pub type CacheValue = serde_json::Value;

/// Physical cache tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Process-local, bounded
    L1,
    /// Shared, remote-latency
    L2,
}

impl Tier {
    /// Metric label for this tier
    pub fn label(&self) -> &'static str {
        match self {
            Self::L1 => "l1",
            Self::L2 => "l2",
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L1 => write!(f, "L1"),
            Self::L2 => write!(f, "L2"),
        }
    }
}

/// Tier placement decided by the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLayer {
    L1Only,
    L2Only,
    Both,
    None,
}

/// Operation kinds the resolver is asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOperation {
    Get,
    Put,
    Evict,
    Clear,
}

/// Why an entry left a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionCause {
    /// Caller asked for it
    Explicit,
    /// Capacity reached
    Size,
    /// TTL elapsed
    Expired,
    /// Whole cache cleared
    Clear,
}

impl EvictionCause {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Size => "size",
            Self::Expired => "expired",
            Self::Clear => "clear",
        }
    }
}

/// Value held by an in-process tier with its expiry metadata
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub value: CacheValue,
    /// Optional expiration time
    pub expires_at: Option<Instant>,
    /// Last access time (for LRU)
    pub accessed_at: Instant,
}

impl StoredEntry {
    pub fn new(value: CacheValue, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: ttl.map(|ttl| now + ttl),
            accessed_at: now,
        }
    }

    /// Check if the value has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires| Instant::now() >= expires)
    }

    pub fn touch(&mut self) {
        self.accessed_at = Instant::now();
    }
}
