//! Micro-benchmarks for AeternusDB core operations.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- put       # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};

use aeternusdb::engine::{Database, DbConfig, EngineConfig};
use std::sync::Arc;
use tempfile::TempDir;

const VALUE_128B: &[u8; 128] = &[0xAB; 128];
const VALUE_1K: &[u8; 1024] = &[0xCD; 1024];

fn make_key(i: u64) -> Vec<u8> {
    format!("key-{i:012}").into_bytes()
}

/// Opens a fresh database with a small write buffer so flushes happen
/// quickly during sustained-write benchmarks.
fn open_small_buffer(dir: &std::path::Path) -> Database {
    Database::open(
        dir,
        DbConfig {
            engine: EngineConfig {
                write_buffer_size: 4 * 1024,
                thread_pool_size: 1,
                ..EngineConfig::default()
            },
        },
    )
    .expect("open")
}

/// Opens a database with a large write buffer so everything stays in the
/// memtable (no background flushes).
fn open_memtable_only(dir: &std::path::Path) -> Database {
    Database::open(
        dir,
        DbConfig {
            engine: EngineConfig {
                write_buffer_size: 64 * 1024 * 1024,
                thread_pool_size: 1,
                ..EngineConfig::default()
            },
        },
    )
    .expect("open")
}

/// Pre-populates a database with `count` sequential keys and closes it, so
/// SSTables exist on disk for read benchmarks.
fn prepopulate(dir: &std::path::Path, count: u64, value: &[u8]) {
    let db = open_small_buffer(dir);
    for i in 0..count {
        db.insert(make_key(i), value.to_vec()).unwrap();
    }
    db.close().unwrap();
}

fn bench_put_memtable_only(c: &mut Criterion) {
    let mut group = c.benchmark_group("put/memtable_only");
    for (label, value) in [("128B", VALUE_128B.as_slice()), ("1K", VALUE_1K.as_slice())] {
        group.throughput(Throughput::Bytes(value.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), value, |b, value| {
            let dir = TempDir::new().unwrap();
            let db = open_memtable_only(dir.path());
            let mut i = 0u64;
            b.iter(|| {
                db.insert(make_key(i), value.to_vec()).unwrap();
                i += 1;
            });
            db.close().unwrap();
        });
    }
    group.finish();
}

fn bench_put_with_flushes(c: &mut Criterion) {
    c.bench_function("put/with_flushes", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let db = open_small_buffer(dir.path());
                (dir, db)
            },
            |(dir, db)| {
                for i in 0..256u64 {
                    db.insert(make_key(i), black_box(VALUE_128B.to_vec())).unwrap();
                }
                db.close().unwrap();
                drop(dir);
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_get_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("get/hit");
    for count in [100u64, 10_000u64] {
        let dir = TempDir::new().unwrap();
        prepopulate(dir.path(), count, VALUE_128B);
        let db = Database::open(dir.path(), DbConfig::default()).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut i = 0u64;
            b.iter(|| {
                let key = make_key(i % count);
                black_box(db.find(&key).unwrap());
                i += 1;
            });
        });
        db.close().unwrap();
    }
    group.finish();
}

fn bench_get_miss(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    prepopulate(dir.path(), 10_000, VALUE_128B);
    let db = Database::open(dir.path(), DbConfig::default()).unwrap();

    c.bench_function("get/miss", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("absent-{i:012}").into_bytes();
            black_box(db.find(&key).unwrap());
            i += 1;
        });
    });
    db.close().unwrap();
}

fn bench_delete(c: &mut Criterion) {
    c.bench_function("delete/existing_key", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let db = open_memtable_only(dir.path());
                db.insert(b"k".to_vec(), VALUE_128B.to_vec()).unwrap();
                (dir, db)
            },
            |(dir, db)| {
                db.erase(b"k".to_vec()).unwrap();
                drop(dir);
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_concurrent_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("get/concurrent_readers");
    for threads in [1usize, 4, 8] {
        let dir = TempDir::new().unwrap();
        prepopulate(dir.path(), 10_000, VALUE_128B);
        let db = Arc::new(Database::open(dir.path(), DbConfig::default()).unwrap());

        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                std::thread::scope(|scope| {
                    for t in 0..threads {
                        let db = Arc::clone(&db);
                        scope.spawn(move || {
                            for i in 0..100u64 {
                                let key = make_key((i * (t as u64 + 1)) % 10_000);
                                black_box(db.find(&key).unwrap());
                            }
                        });
                    }
                });
            });
        });
        db.close().unwrap();
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_put_memtable_only,
    bench_put_with_flushes,
    bench_get_hit,
    bench_get_miss,
    bench_delete,
    bench_concurrent_reads,
);
criterion_main!(benches);
