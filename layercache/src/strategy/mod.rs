//! Consistency strategies
//!
//! A strategy decides how a write or an eviction reaches the two tiers. All three
//! variants share the same read path: L1 first, then L2 with promotion into L1.
//! A `None` tier handle means the tier is absent and is skipped.

pub mod cache_aside;
pub mod write_behind;
pub mod write_through;

pub use cache_aside::CacheAside;
pub use write_behind::WriteBehind;
pub use write_through::WriteThrough;

use crate::config::{StrategyConfig, StrategyKind};
use crate::core::{CacheHandle, CacheKey, CacheValue, Result, Tier};
use crate::metrics::CacheMetrics;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// How writes and evictions are propagated across L1 and L2
#[async_trait]
pub trait CacheStrategy<K: CacheKey>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn put(
        &self,
        key: &K,
        value: &CacheValue,
        l1: Option<&CacheHandle<K>>,
        l2: Option<&CacheHandle<K>>,
    ) -> Result<()>;

    async fn get(
        &self,
        key: &K,
        l1: Option<&CacheHandle<K>>,
        l2: Option<&CacheHandle<K>>,
    ) -> Result<Option<CacheValue>>;

    async fn evict(
        &self,
        key: &K,
        l1: Option<&CacheHandle<K>>,
        l2: Option<&CacheHandle<K>>,
    ) -> Result<()>;

    /// Release background resources. Strategies without any have nothing to do.
    async fn shutdown(&self) {}
}

/// Shared handle to the strategy every cache of a manager uses
pub type StrategyHandle<K> = Arc<dyn CacheStrategy<K>>;

/// Build the strategy selected in configuration
pub fn build_strategy<K: CacheKey>(
    config: &StrategyConfig,
    metrics: Arc<CacheMetrics>,
) -> Result<StrategyHandle<K>> {
    let strategy: StrategyHandle<K> = match config.kind {
        StrategyKind::CacheAside => Arc::new(CacheAside::new()),
        StrategyKind::WriteThrough => Arc::new(WriteThrough::new()),
        StrategyKind::WriteBehind => {
            Arc::new(WriteBehind::start(config.write_behind.clone(), metrics)?)
        }
    };
    Ok(strategy)
}

/// L1, then L2 with promotion. Tier failures are logged and read as a miss.
pub(crate) async fn read_through<K: CacheKey>(
    strategy: &str,
    key: &K,
    l1: Option<&CacheHandle<K>>,
    l2: Option<&CacheHandle<K>>,
) -> Option<CacheValue> {
    if let Some(l1) = l1 {
        match l1.get(key).await {
            Ok(Some(value)) => return Some(value),
            Ok(None) => {}
            Err(e) => {
                warn!(strategy, tier = %Tier::L1, key = ?key, error = %e, "L1 read failed")
            }
        }
    }

    let l2 = l2?;
    let value = match l2.get(key).await {
        Ok(value) => value?,
        Err(e) => {
            warn!(strategy, tier = %Tier::L2, key = ?key, error = %e, "L2 read failed");
            return None;
        }
    };

    if let Some(l1) = l1 {
        match l1.put(key, &value).await {
            Ok(()) => debug!(strategy, key = ?key, "Promoted L2 value into L1"),
            Err(e) => warn!(strategy, key = ?key, error = %e, "Promotion into L1 failed"),
        }
    }
    Some(value)
}

/// Best-effort strategies log a failed tier operation and carry on
pub(crate) fn log_failure(
    strategy: &str,
    tier: Tier,
    operation: &str,
    key: &(dyn std::fmt::Debug + Sync),
    result: Result<()>,
) {
    if let Err(e) = result {
        warn!(
            strategy,
            tier = %tier,
            operation,
            key = ?key,
            error = %e,
            "Tier operation failed, continuing"
        );
    }
}
