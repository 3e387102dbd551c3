//! Throughput benchmarks for the storage engine.
//!
//! Measures single-shard and cross-shard performance of `Database`
//! operations under several access patterns.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use nimbuskv::store::StorageEngine;
use std::sync::Arc;
use std::time::Duration;

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new(16));
    let db = engine.db(0);

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            let value = Bytes::from("small_value");
            db.set(key, value);
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024)); // 1KB value
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            db.set(key, value.clone());
            i += 1;
        });
    });

    group.bench_function("set_large", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(64 * 1024)); // 64KB value
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            db.set(key, value.clone());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new(16));
    let db = engine.db(0);

    // Pre-populate with data
    for i in 0..100_000 {
        let key = Bytes::from(format!("key:{}", i));
        let value = Bytes::from(format!("value:{}", i));
        db.set(key, value);
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i % 100_000));
            black_box(db.get(&key).unwrap());
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("missing:{}", i));
            black_box(db.get(&key).unwrap());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark mixed workload (80% reads, 20% writes)
fn bench_mixed(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new(16));
    let db = engine.db(0);

    // Pre-populate
    for i in 0..10_000 {
        let key = Bytes::from(format!("key:{}", i));
        let value = Bytes::from(format!("value:{}", i));
        db.set(key, value);
    }

    let mut group = c.benchmark_group("mixed");
    group.throughput(Throughput::Elements(1));

    group.bench_function("80_read_20_write", |b| {
        let mut i = 0u64;
        b.iter(|| {
            if i % 5 == 0 {
                // 20% writes
                let key = Bytes::from(format!("new:{}", i));
                let value = Bytes::from("value");
                db.set(key, value);
            } else {
                // 80% reads
                let key = Bytes::from(format!("key:{}", i % 10_000));
                black_box(db.get(&key).unwrap());
            }
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark INCR operations
fn bench_incr(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new(16));
    let db = engine.db(0);

    let mut group = c.benchmark_group("incr");
    group.throughput(Throughput::Elements(1));

    // Single counter (high contention)
    group.bench_function("single_counter", |b| {
        let key = Bytes::from("counter");
        b.iter(|| {
            black_box(db.incr_by(&key, 1).unwrap());
        });
    });

    // Multiple counters (low contention)
    group.bench_function("multiple_counters", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("counter:{}", i % 1000));
            black_box(db.incr_by(&key, 1).unwrap());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark concurrent access across connections sharing one engine
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let engine = Arc::new(StorageEngine::new(16));
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let engine = Arc::clone(&engine);
                    thread::spawn(move || {
                        let db = engine.db(0);
                        for i in 0..10_000 {
                            let key = Bytes::from(format!("key:{}:{}", t, i));
                            let value = Bytes::from("value");
                            db.set(key.clone(), value);
                            db.get(&key).unwrap();
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(engine.db(0).keys("*").len());
        });
    });

    group.finish();
}

/// Benchmark KEYS pattern matching
fn bench_keys(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new(16));
    let db = engine.db(0);

    // Pre-populate with various key patterns
    for i in 0..1_000 {
        db.set(Bytes::from(format!("user:{}", i)), Bytes::from("user_data"));
        db.set(
            Bytes::from(format!("session:{}", i)),
            Bytes::from("session_data"),
        );
        db.set(
            Bytes::from(format!("cache:{}", i)),
            Bytes::from("cache_data"),
        );
    }

    let mut group = c.benchmark_group("keys");

    group.bench_function("keys_pattern", |b| {
        b.iter(|| {
            black_box(db.keys("user:*"));
        });
    });

    group.bench_function("keys_all", |b| {
        b.iter(|| {
            black_box(db.keys("*"));
        });
    });

    group.finish();
}

/// Benchmark list push/pop operations
fn bench_list(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new(16));
    let db = engine.db(0);

    let mut group = c.benchmark_group("list");
    group.throughput(Throughput::Elements(1));

    group.bench_function("rpush", |b| {
        let key = Bytes::from("bench:list");
        b.iter(|| {
            black_box(db.rpush(&key, vec![Bytes::from("item")]).unwrap());
        });
    });

    group.bench_function("lpop", |b| {
        let key = Bytes::from("bench:list:pop");
        for _ in 0..100_000 {
            db.rpush(&key, vec![Bytes::from("item")]).unwrap();
        }
        b.iter(|| {
            if db.llen(&key).unwrap() == 0 {
                db.rpush(&key, vec![Bytes::from("item")]).unwrap();
            }
            black_box(db.lpop(&key).unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_mixed,
    bench_incr,
    bench_concurrent,
    bench_keys,
    bench_list,
);

criterion_main!(benches);
