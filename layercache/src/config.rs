use crate::core::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main layercache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerCacheConfig {
    pub l1: L1Config,
    /// L2 tier; absent means L1-only mode
    pub l2: Option<L2Config>,
    pub strategy: StrategyConfig,
    pub resolver: ResolverConfig,
    /// Whether `Value::Null` may be stored
    pub allow_null_values: bool,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct L1Config {
    pub max_entries: usize,
    /// Expire-after-write TTL, 0 disables expiry
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct L2Config {
    pub directory: PathBuf,
    /// Default TTL, 0 disables expiry
    pub default_ttl_secs: u64,
    pub max_entries: usize,
    pub max_size_mb: usize,
    /// Per-cache TTL in seconds
    pub ttl_overrides: HashMap<String, u64>,
}

/// Which consistency strategy every cache shares
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    CacheAside,
    WriteThrough,
    WriteBehind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    pub write_behind: WriteBehindConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteBehindConfig {
    /// Max operations per drained batch; queue depth at or above this triggers a flush
    pub batch_size: usize,
    /// Timer-driven flush period in milliseconds
    pub flush_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// GET count above which a key is hot (L1 only)
    pub hot_threshold: u64,
    /// GET count above which a key is warm (both tiers)
    pub warm_threshold: u64,
    /// Access count above which the TTL is doubled
    pub long_ttl_threshold: u64,
    /// Access count at or below which the TTL is halved
    pub short_ttl_threshold: u64,
    /// Largest serialized value worth caching
    pub max_value_size: usize,
    /// Cap on tracked access-pattern records
    pub max_tracked_keys: usize,
    /// Baseline TTL in seconds
    pub base_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LayerCacheConfig {
    fn default() -> Self {
        Self {
            l1: L1Config::default(),
            l2: None,
            strategy: StrategyConfig::default(),
            resolver: ResolverConfig::default(),
            allow_null_values: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_secs: 3600,
        }
    }
}

impl Default for L2Config {
    fn default() -> Self {
        Self::with_directory("./data/cache/l2")
    }
}

impl Default for WriteBehindConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval_ms: 5000,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            hot_threshold: 10,
            warm_threshold: 2,
            long_ttl_threshold: 100,
            short_ttl_threshold: 10,
            max_value_size: 10_000,
            max_tracked_keys: 100_000,
            base_ttl_secs: 3600,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

fn secs_to_ttl(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl L1Config {
    pub fn ttl(&self) -> Option<Duration> {
        secs_to_ttl(self.ttl_secs)
    }
}

impl L2Config {
    pub fn with_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            default_ttl_secs: 3600,
            max_entries: 100_000,
            max_size_mb: 1024,
            ttl_overrides: HashMap::new(),
        }
    }

    /// TTL for a cache name, honouring overrides
    pub fn ttl_for(&self, name: &str) -> Option<Duration> {
        let secs = self
            .ttl_overrides
            .get(name)
            .copied()
            .unwrap_or(self.default_ttl_secs);
        secs_to_ttl(secs)
    }
}

impl WriteBehindConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl LayerCacheConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: LayerCacheConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.l1.max_entries == 0 {
            return Err(CacheError::Config("l1.max_entries must be > 0".into()));
        }
        if let Some(l2) = &self.l2 {
            if l2.max_entries == 0 || l2.max_size_mb == 0 {
                return Err(CacheError::Config(
                    "l2.max_entries and l2.max_size_mb must be > 0".into(),
                ));
            }
        }
        let write_behind = &self.strategy.write_behind;
        if write_behind.batch_size == 0 {
            return Err(CacheError::Config(
                "strategy.write_behind.batch_size must be > 0".into(),
            ));
        }
        if write_behind.flush_interval_ms == 0 {
            return Err(CacheError::Config(
                "strategy.write_behind.flush_interval_ms must be > 0".into(),
            ));
        }
        if self.resolver.warm_threshold >= self.resolver.hot_threshold {
            return Err(CacheError::Config(format!(
                "resolver.warm_threshold ({}) must be below hot_threshold ({})",
                self.resolver.warm_threshold, self.resolver.hot_threshold
            )));
        }
        if self.resolver.max_tracked_keys == 0 {
            return Err(CacheError::Config(
                "resolver.max_tracked_keys must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LayerCacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.strategy.kind, StrategyKind::CacheAside);
        assert!(config.l2.is_none());
        assert!(!config.allow_null_values);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
l1:
  max_entries: 500
l2:
  directory: /tmp/layercache
  ttl_overrides:
    sessions: 300
strategy:
  kind: write_behind
  write_behind:
    batch_size: 2
allow_null_values: true
"#;
        let config: LayerCacheConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.l1.max_entries, 500);
        assert_eq!(config.l1.ttl_secs, 3600);
        assert_eq!(config.strategy.kind, StrategyKind::WriteBehind);
        assert_eq!(config.strategy.write_behind.batch_size, 2);
        assert_eq!(config.strategy.write_behind.flush_interval_ms, 5000);

        let l2 = config.l2.unwrap();
        assert_eq!(l2.ttl_for("sessions"), Some(Duration::from_secs(300)));
        assert_eq!(l2.ttl_for("users"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        let mut config = LayerCacheConfig::default();
        config.resolver.warm_threshold = 10;
        assert!(matches!(config.validate(), Err(CacheError::Config(_))));

        let mut config = LayerCacheConfig::default();
        config.strategy.write_behind.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_ttl_disables_expiry() {
        let l1 = L1Config {
            max_entries: 1,
            ttl_secs: 0,
        };
        assert_eq!(l1.ttl(), None);
    }
}
