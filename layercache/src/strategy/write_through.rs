use super::{CacheStrategy, read_through};
use crate::core::{CacheError, CacheHandle, CacheKey, CacheValue, Result, Tier};
use async_trait::async_trait;
use tracing::{debug, error};

const NAME: &str = "write-through";

/// Writes and evictions go to both tiers concurrently and complete only when both
/// have. A failure on either tier is returned as [`CacheError::WriteConsistency`].
#[derive(Debug, Default, Clone, Copy)]
pub struct WriteThrough;

impl WriteThrough {
    pub fn new() -> Self {
        Self
    }

    /// Fold both tier outcomes into one result, naming the first failed tier
    fn settle<K: CacheKey>(
        operation: &str,
        key: &K,
        l1_result: Result<()>,
        l2_result: Result<()>,
    ) -> Result<()> {
        let mut first_failure = None;

        for (tier, result) in [(Tier::L1, l1_result), (Tier::L2, l2_result)] {
            if let Err(e) = result {
                error!(
                    strategy = NAME,
                    tier = %tier,
                    operation,
                    key = ?key,
                    error = %e,
                    "Tier write failed, tiers may be out of step"
                );
                if first_failure.is_none() {
                    first_failure = Some((tier, e));
                }
            }
        }

        match first_failure {
            None => Ok(()),
            Some((tier, source)) => Err(CacheError::WriteConsistency {
                strategy: NAME,
                tier,
                key: format!("{key:?}"),
                source: Box::new(source),
            }),
        }
    }
}

#[async_trait]
impl<K: CacheKey> CacheStrategy<K> for WriteThrough {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn put(
        &self,
        key: &K,
        value: &CacheValue,
        l1: Option<&CacheHandle<K>>,
        l2: Option<&CacheHandle<K>>,
    ) -> Result<()> {
        let (l1_result, l2_result) = tokio::join!(
            async {
                match l1 {
                    Some(l1) => l1.put(key, value).await,
                    None => Ok(()),
                }
            },
            async {
                match l2 {
                    Some(l2) => l2.put(key, value).await,
                    None => Ok(()),
                }
            }
        );

        Self::settle("put", key, l1_result, l2_result)?;
        debug!(strategy = NAME, key = ?key, "Stored value in both tiers");
        Ok(())
    }

    async fn get(
        &self,
        key: &K,
        l1: Option<&CacheHandle<K>>,
        l2: Option<&CacheHandle<K>>,
    ) -> Result<Option<CacheValue>> {
        Ok(read_through(NAME, key, l1, l2).await)
    }

    async fn evict(
        &self,
        key: &K,
        l1: Option<&CacheHandle<K>>,
        l2: Option<&CacheHandle<K>>,
    ) -> Result<()> {
        let (l1_result, l2_result) = tokio::join!(
            async {
                match l1 {
                    Some(l1) => l1.evict(key).await,
                    None => Ok(()),
                }
            },
            async {
                match l2 {
                    Some(l2) => l2.evict(key).await,
                    None => Ok(()),
                }
            }
        );

        Self::settle("evict", key, l1_result, l2_result)
    }
}
