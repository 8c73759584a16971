pub mod error;
pub mod traits;
pub mod types;

pub use error::{CacheError, LoaderError, Result};
pub use traits::{Cache, CacheHandle, CacheProvider};
pub use types::{
    CacheKey, CacheLayer, CacheOperation, CacheValue, EvictionCause, StoredEntry, Tier,
};
