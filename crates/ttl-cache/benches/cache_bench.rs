// crates/ttl-cache/benches/cache_bench.rs
//
// Three Criterion benchmark groups:
//   hit_path        — repeated get_and_ref against an already-populated key
//   miss_path       — get_and_ref against a fresh key every iteration
//   contended_path  — get_and_ref from several threads against one key

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use ttl_cache::{Cache, CacheDelegate, JobRunner};

struct EchoDelegate;

impl CacheDelegate<u64> for EchoDelegate {
    fn create(&self, key: &[u8]) -> Option<u64> {
        Some(key.iter().map(|b| *b as u64).sum())
    }
}

fn hit_path(c: &mut Criterion) {
    let cache = Cache::new(EchoDelegate, Duration::from_secs(300), Arc::new(JobRunner::new()));
    let _ = cache.get_and_ref(b"warm").unwrap();

    c.bench_function("hit_path", |b| {
        b.iter(|| black_box(cache.get_and_ref(black_box(b"warm")).unwrap()))
    });
}

fn miss_path(c: &mut Criterion) {
    let cache = Cache::new(EchoDelegate, Duration::from_secs(300), Arc::new(JobRunner::new()));
    let counter = AtomicU64::new(0);

    c.bench_function("miss_path", |b| {
        b.iter(|| {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            let key = n.to_le_bytes();
            black_box(cache.get_and_ref(black_box(&key)).unwrap())
        })
    });
}

fn contended_path(c: &mut Criterion) {
    use criterion::Throughput;

    let cache = Cache::new(EchoDelegate, Duration::from_secs(300), Arc::new(JobRunner::new()));
    let _ = cache.get_and_ref(b"shared").unwrap();

    let mut group = c.benchmark_group("contended_path");
    group.throughput(Throughput::Elements(1));
    group.bench_function("eight_threads", |b| {
        b.iter(|| {
            std::thread::scope(|scope| {
                for _ in 0..8 {
                    let cache = &cache;
                    scope.spawn(move || {
                        let _ = black_box(cache.get_and_ref(black_box(b"shared")));
                    });
                }
            })
        })
    });
    group.finish();
}

criterion_group!(benches, hit_path, miss_path, contended_path);
criterion_main!(benches);
