use super::types::Tier;
use thiserror::Error;

/// Boxed error returned by value loaders passed to `get_or_load`
pub type LoaderError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for layercache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// A tier implementation failed an operation
    #[error("Backend error in '{tier_name}': {message}")]
    Backend { tier_name: String, message: String },

    /// Write-through could not keep both tiers in step
    #[error("{strategy} failed to write key {key} to {tier}: {source}")]
    WriteConsistency {
        strategy: &'static str,
        tier: Tier,
        key: String,
        #[source]
        source: Box<CacheError>,
    },

    /// Value loader failed on a miss; nothing was cached
    #[error("Value for key {key} in cache '{cache}' could not be loaded: {source}")]
    Retrieval {
        cache: String,
        key: String,
        #[source]
        source: LoaderError,
    },

    /// Stored value does not have the requested shape
    #[error("Value for key {key} in cache '{cache}' is not a {expected}: {reason}")]
    TypeMismatch {
        cache: String,
        key: String,
        expected: &'static str,
        reason: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Shorthand used by tier implementations
    pub fn backend(tier_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            tier_name: tier_name.into(),
            message: message.into(),
        }
    }

    /// Tier involved in the failure, when known
    pub fn tier(&self) -> Option<Tier> {
        match self {
            Self::WriteConsistency { tier, .. } => Some(*tier),
            _ => None,
        }
    }
}

/// Result type alias for layercache operations
pub type Result<T> = std::result::Result<T, CacheError>;
