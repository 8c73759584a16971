//! layercache demo
//!
//! Builds a cache manager from a YAML config, drives a skewed read-through workload
//! against one cache and prints the resulting Prometheus metrics.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use layercache::{Cache, CacheValue, LayerCacheConfig, MultiLayerCacheManager, StrategyKind};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "layercache")]
#[command(about = "Run a read-through workload against a two-tier cache", long_about = None)]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured write strategy
    #[arg(short, long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Distinct keys in the workload
    #[arg(short, long, default_value_t = 100)]
    keys: usize,

    /// Passes over the key space
    #[arg(short, long, default_value_t = 5)]
    rounds: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    CacheAside,
    WriteThrough,
    WriteBehind,
}

impl From<StrategyArg> for StrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::CacheAside => StrategyKind::CacheAside,
            StrategyArg::WriteThrough => StrategyKind::WriteThrough,
            StrategyArg::WriteBehind => StrategyKind::WriteBehind,
        }
    }
}

fn init_logging(config: &LayerCacheConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

/// Stand-in for an expensive lookup
fn compute(key: &str) -> CacheValue {
    json!({ "id": key, "name": format!("user {key}") })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => LayerCacheConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => LayerCacheConfig::default(),
    };
    if let Some(strategy) = cli.strategy {
        config.strategy.kind = strategy.into();
    }

    init_logging(&config);
    info!("Starting layercache v{}", env!("CARGO_PKG_VERSION"));

    let manager: MultiLayerCacheManager<String> = MultiLayerCacheManager::from_config(&config)?;
    let cache = manager.get_cache("users");
    let resolver = manager.resolver();

    let (mut hits, mut computed, mut stored) = (0u64, 0u64, 0u64);
    let hot_keys = (cli.keys / 10).max(1);

    for round in 0..cli.rounds {
        // Every pass reads the whole key space once and the hot tenth a few more times
        let workload = (0..cli.keys).chain((0..4).flat_map(|_| 0..hot_keys));

        for i in workload {
            let key = format!("user:{i}");
            if cache.get(&key).await?.is_some() {
                hits += 1;
                continue;
            }

            computed += 1;
            let value = compute(&key);
            if resolver.should_cache(&key, &value) {
                cache.put(&key, &value).await?;
                stored += 1;
            }
        }

        info!(round, hits, computed, stored, "Workload round finished");
    }

    manager.shutdown().await;

    let stats = manager.metrics().stats(cache.name());
    info!(
        hits,
        computed,
        stored,
        tracked_keys = resolver.tracked_keys(),
        hit_ratio = stats.hit_ratio(),
        "Workload complete"
    );

    let exposition = manager
        .metrics()
        .encode()
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {e}"))?;
    println!("{exposition}");

    Ok(())
}
