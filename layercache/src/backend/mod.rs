//! Tier implementations
//!
//! - L1: bounded in-memory LRU with TTL ([`LocalCache`])
//! - L2: shared file-backed store ([`DiskCache`])

pub mod disk;
pub mod local;

pub use disk::{DiskCache, DiskCacheProvider};
pub use local::{LocalCache, LocalCacheProvider, LocalCacheStats};
