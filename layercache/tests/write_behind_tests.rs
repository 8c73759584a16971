mod common;

use common::{Harness, RecordingCache, key};
use layercache::{
    Cache, CacheMetrics, CacheStrategy, StrategyHandle, WriteBehind, WriteBehindConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn write_behind(
    batch_size: usize,
    flush_interval_ms: u64,
) -> (WriteBehind<String>, Arc<CacheMetrics>) {
    let metrics = Arc::new(CacheMetrics::new());
    let strategy = WriteBehind::start(
        WriteBehindConfig {
            batch_size,
            flush_interval_ms,
        },
        Arc::clone(&metrics),
    )
    .unwrap();
    (strategy, metrics)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_applies_every_queued_put() {
    let (strategy, _metrics) = write_behind(2, 60_000);
    let (l1, l2) = (RecordingCache::new("l1"), RecordingCache::new("l2"));

    for i in 0..5 {
        strategy
            .put(
                &format!("user:{i}"),
                &json!(format!("value-{i}")),
                Some(&l1.handle()),
                Some(&l2.handle()),
            )
            .await
            .unwrap();
    }

    strategy.shutdown().await;

    for i in 0..5 {
        assert_eq!(
            l2.peek(&format!("user:{i}")),
            Some(json!(format!("value-{i}")))
        );
    }
    assert_eq!(l2.puts(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_l1_is_updated_before_put_returns() {
    let (strategy, metrics) = write_behind(100, 60_000);
    let (l1, l2) = (RecordingCache::new("l1"), RecordingCache::new("l2"));

    strategy
        .put(&key("k"), &json!("v"), Some(&l1.handle()), Some(&l2.handle()))
        .await
        .unwrap();

    assert_eq!(l1.peek("k"), Some(json!("v")));
    assert_eq!(l2.peek("k"), None);
    assert_eq!(metrics.queue_depth(), 1);

    strategy.shutdown().await;
    assert_eq!(l2.peek("k"), Some(json!("v")));
    assert_eq!(metrics.queue_depth(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_evict_is_queued_for_l2() {
    let (strategy, metrics) = write_behind(100, 60_000);
    let (l1, l2) = (RecordingCache::new("l1"), RecordingCache::new("l2"));
    l1.seed("k", json!(1));
    l2.seed("k", json!(1));

    strategy
        .evict(&key("k"), Some(&l1.handle()), Some(&l2.handle()))
        .await
        .unwrap();
    assert_eq!(l1.peek("k"), None);
    assert_eq!(l2.peek("k"), Some(json!(1)));

    strategy.shutdown().await;
    assert_eq!(l2.peek("k"), None);
    assert_eq!(metrics.write_behind_count("evict", true), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timer_flushes_small_batches() {
    let (strategy, metrics) = write_behind(100, 20);
    let (l1, l2) = (RecordingCache::new("l1"), RecordingCache::new("l2"));

    strategy
        .put(&key("k"), &json!(true), Some(&l1.handle()), Some(&l2.handle()))
        .await
        .unwrap();

    let mut applied = false;
    for _ in 0..100 {
        if l2.peek("k").is_some() {
            applied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(applied);
    assert_eq!(metrics.write_behind_count("put", true), 1);

    strategy.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_operation_does_not_abort_batch() {
    let (strategy, metrics) = write_behind(10, 60_000);
    let (l1, l2) = (RecordingCache::new("l1"), RecordingCache::new("l2"));
    l2.fail_puts_for("bad");

    for name in ["a", "bad", "b"] {
        strategy
            .put(&key(name), &json!(name), Some(&l1.handle()), Some(&l2.handle()))
            .await
            .unwrap();
    }
    strategy.shutdown().await;

    assert_eq!(l2.peek("a"), Some(json!("a")));
    assert_eq!(l2.peek("b"), Some(json!("b")));
    assert_eq!(l2.peek("bad"), None);
    assert_eq!(l1.peek("bad"), Some(json!("bad")));
    assert_eq!(metrics.write_behind_count("put", true), 2);
    assert_eq!(metrics.write_behind_count("put", false), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_lose_nothing() {
    let (strategy, _metrics) = write_behind(8, 10);
    let strategy = Arc::new(strategy);
    let (l1, l2) = (RecordingCache::new("l1"), RecordingCache::new("l2"));

    let mut handles = Vec::new();
    for producer in 0..4 {
        let strategy = Arc::clone(&strategy);
        let (l1, l2) = (l1.handle(), l2.handle());
        handles.push(tokio::spawn(async move {
            for i in 0..50 {
                strategy
                    .put(&format!("p{producer}:{i}"), &json!(i), Some(&l1), Some(&l2))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    strategy.shutdown().await;
    assert_eq!(l2.len(), 200);
    assert_eq!(strategy.pending(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_put_during_shutdown_lands_after_queued_put() {
    let (strategy, _metrics) = write_behind(1, 60_000);
    let strategy = Arc::new(strategy);
    let (l1, l2) = (RecordingCache::new("l1"), RecordingCache::new("l2"));
    l2.slow_puts_for("slow", Duration::from_millis(300));

    strategy
        .put(&key("slow"), &json!(0), Some(&l1.handle()), Some(&l2.handle()))
        .await
        .unwrap();
    strategy
        .put(&key("k"), &json!("v1"), Some(&l1.handle()), Some(&l2.handle()))
        .await
        .unwrap();

    let closing = tokio::spawn({
        let strategy = Arc::clone(&strategy);
        async move { strategy.shutdown().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    strategy
        .put(&key("k"), &json!("v2"), Some(&l1.handle()), Some(&l2.handle()))
        .await
        .unwrap();
    closing.await.unwrap();

    assert_eq!(l1.peek("k"), Some(json!("v2")));
    assert_eq!(l2.peek("k"), Some(json!("v2")));
    assert_eq!(l2.peek("slow"), Some(json!(0)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_second_shutdown_waits_for_drain() {
    let (strategy, _metrics) = write_behind(1, 60_000);
    let strategy = Arc::new(strategy);
    let (l1, l2) = (RecordingCache::new("l1"), RecordingCache::new("l2"));
    l2.slow_puts_for("slow", Duration::from_millis(200));

    for name in ["slow", "a", "b", "c"] {
        strategy
            .put(&key(name), &json!(name), Some(&l1.handle()), Some(&l2.handle()))
            .await
            .unwrap();
    }

    let first = tokio::spawn({
        let strategy = Arc::clone(&strategy);
        async move { strategy.shutdown().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    strategy.shutdown().await;
    for name in ["slow", "a", "b", "c"] {
        assert_eq!(l2.peek(name), Some(json!(name)));
    }
    assert_eq!(strategy.pending(), 0);
    first.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_evicting_absent_key_through_cache_changes_nothing() {
    let (strategy, metrics) = write_behind(10, 60_000);
    let strategy = Arc::new(strategy);
    let h = Harness::new(Arc::clone(&strategy) as StrategyHandle<String>);
    let cache = h.manager.get_cache("users");
    let (l1, l2) = (h.l1.tier("users"), h.l2.tier("users"));
    l1.seed("present", json!(1));
    l2.seed("present", json!(1));

    assert!(!cache.evict_if_present(&key("absent")).await.unwrap());
    cache.evict(&key("absent")).await.unwrap();
    h.manager.shutdown().await;

    assert_eq!(l1.len(), 1);
    assert_eq!(l2.len(), 1);
    assert_eq!(l2.peek("present"), Some(json!(1)));
    assert_eq!(l1.puts() + l2.puts(), 0);
    assert_eq!(h.metrics.stats("users").evictions, 0);
    assert_eq!(metrics.write_behind_count("evict", false), 0);
}
