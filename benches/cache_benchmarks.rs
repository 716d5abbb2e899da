#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{hint::black_box, sync::Arc, thread, time::Duration};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use spm_registry::auth::oidc::cache_key;
use spm_registry::cache::TtlLruCache;

const TTL: Duration = Duration::from_secs(3600);

fn populated(capacity: usize) -> TtlLruCache<String> {
    let cache = TtlLruCache::new(capacity, TTL);
    for i in 0..capacity {
        cache.add(format!("user:{i}"), format!("token-{i}"));
    }
    cache
}

fn bench_cache_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_add");
    group.throughput(Throughput::Elements(1));

    for size in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            // Full cache: every add evicts the least recently used entry
            let cache = populated(size);
            let mut i = size;
            b.iter(|| {
                cache.add(format!("user:{i}"), black_box("token".to_string()));
                i += 1;
            });
        });
    }

    group.finish();
}

fn bench_cache_get_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_get_hit");
    group.throughput(Throughput::Elements(1));

    for size in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let cache = populated(size);
            let key = format!("user:{}", size / 2);
            b.iter(|| black_box(cache.get(black_box(&key))));
        });
    }

    group.finish();
}

fn bench_cache_get_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_get_miss");
    group.throughput(Throughput::Elements(1));

    let cache = populated(1_000);
    group.bench_function("absent_key", |b| {
        b.iter(|| black_box(cache.get(black_box("user:absent"))));
    });

    group.finish();
}

fn bench_cache_key(c: &mut Criterion) {
    c.bench_function("cache_key", |b| {
        b.iter(|| cache_key(black_box("alice"), black_box("correct horse battery staple")));
    });
}

fn bench_concurrent_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_concurrent");

    for threads in [2, 4, 8] {
        group.throughput(Throughput::Elements(threads as u64 * 100));
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &threads| {
                let cache = Arc::new(populated(1_000));
                b.iter(|| {
                    let handles: Vec<_> = (0..threads)
                        .map(|t| {
                            let cache = Arc::clone(&cache);
                            thread::spawn(move || {
                                for i in 0..100 {
                                    let key = format!("user:{}", (t * 100 + i) % 1_500);
                                    if cache.get(&key).is_none() {
                                        cache.add(key, "token".to_string());
                                    }
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cache_add,
    bench_cache_get_hit,
    bench_cache_get_miss,
    bench_cache_key,
    bench_concurrent_access,
);
criterion_main!(benches);
