//! Benchmarks for `RecencyCache` hot paths.

#![allow(missing_docs, clippy::unwrap_used)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use orderflow_core::RecencyCache;
use std::num::NonZeroUsize;

fn filled(capacity: usize) -> RecencyCache<String, usize> {
    let cache = RecencyCache::new(NonZeroUsize::new(capacity).unwrap());
    for i in 0..capacity {
        cache.set(format!("order-{i}"), i);
    }
    cache
}

fn bench_get_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_get_hit");
    for capacity in [30, 1_000, 100_000] {
        let cache = filled(capacity);
        let key = format!("order-{}", capacity / 2);
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &key, |b, key| {
            b.iter(|| black_box(cache.get(key.as_str())));
        });
    }
    group.finish();
}

fn bench_set_evicting(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_set_evicting");
    for capacity in [30, 1_000, 100_000] {
        let cache = filled(capacity);
        let mut next = capacity;
        group.bench_function(BenchmarkId::from_parameter(capacity), |b| {
            b.iter(|| {
                next += 1;
                black_box(cache.set(format!("order-{next}"), next))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_get_hit, bench_set_evicting);
criterion_main!(benches);
