use criterion::{Criterion, black_box, criterion_group, criterion_main};
use layercache::{
    AccessResolver, Cache, CacheAside, CacheMetrics, CacheOperation, CacheProvider, L1Config,
    LocalCacheProvider, MultiLayerCacheManager,
};
use serde_json::json;
use std::sync::Arc;

fn manager() -> MultiLayerCacheManager<String> {
    let metrics = Arc::new(CacheMetrics::new());
    let l1: Arc<dyn CacheProvider<String>> = Arc::new(LocalCacheProvider::new(
        L1Config::default(),
        Arc::clone(&metrics),
    ));
    let l2: Arc<dyn CacheProvider<String>> = Arc::new(LocalCacheProvider::new(
        L1Config::default(),
        Arc::clone(&metrics),
    ));

    MultiLayerCacheManager::builder()
        .l1_provider(l1)
        .l2_provider(l2)
        .strategy(Arc::new(CacheAside::new()))
        .metrics(metrics)
        .build()
        .unwrap()
}

fn bench_l1_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = manager();
    let cache = manager.get_cache("bench");
    let key = "hot".to_string();

    rt.block_on(async {
        cache.put(&key, &json!({"id": 1})).await.unwrap();
    });

    c.bench_function("l1_hit", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(cache.get(black_box(&key)).await.unwrap());
        });
    });
}

fn bench_l2_hit_with_promotion(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = manager();
    let cache = manager.get_cache("bench");
    let key = "cold".to_string();

    rt.block_on(async {
        cache.put(&key, &json!({"id": 2})).await.unwrap();
    });

    c.bench_function("l2_hit_with_promotion", |b| {
        b.to_async(&rt).iter(|| async {
            let l1 = cache.l1().unwrap();
            l1.evict(&key).await.unwrap();
            black_box(cache.get(black_box(&key)).await.unwrap());
        });
    });
}

fn bench_miss(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = manager();
    let cache = manager.get_cache("bench");
    let key = "absent".to_string();

    c.bench_function("miss", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(cache.get(black_box(&key)).await.unwrap());
        });
    });
}

fn bench_resolver(c: &mut Criterion) {
    let resolver: AccessResolver<u64> = AccessResolver::default();
    let mut i = 0u64;

    c.bench_function("resolver_get", |b| {
        b.iter(|| {
            i = (i + 1) % 1000;
            black_box(resolver.resolve_cache(black_box(&i), CacheOperation::Get));
        });
    });
}

criterion_group!(
    benches,
    bench_l1_hit,
    bench_l2_hit_with_promotion,
    bench_miss,
    bench_resolver
);
criterion_main!(benches);
