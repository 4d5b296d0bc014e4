//! YCSB-style macro-benchmarks for AeternusDB.
//!
//! Measures sustained throughput and latency distributions under
//! realistic mixed workloads inspired by the Yahoo Cloud Serving
//! Benchmark (YCSB).
//!
//! # Workloads
//!
//! | Name | Mix | Description |
//! |------|-----|-------------|
//! | **A** | 50% read, 50% update | Session store — heavy read/write |
//! | **B** | 95% read, 5% update | Photo tagging — read-mostly |
//! | **C** | 100% read | User profile cache — read-only |
//! | **D** | 95% read, 5% insert | Read-latest — status updates |
//! | **F** | 50% read, 50% read-modify-write | User database — RMW |
//!
//! The original YCSB workload E (95% short-range scan, 5% insert) is not
//! benchmarked here: range scans are not part of the public API (see
//! DESIGN.md).
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench ycsb               # all workloads
//! cargo bench --bench ycsb -- "load"      # load phase only
//! cargo bench --bench ycsb -- "A"         # workload A only
//! ```

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};

use aeternusdb::engine::{Database, DbConfig, EngineConfig};
use rand::Rng;
use std::hint::black_box;
use tempfile::TempDir;

const RECORD_COUNT: u64 = 10_000;
const OPS_PER_RUN: u64 = 5_000;
const VALUE_SIZE: usize = 256;

fn make_key(i: u64) -> Vec<u8> {
    format!("user{i:012}").into_bytes()
}

fn make_value(rng: &mut impl Rng) -> Vec<u8> {
    let mut buf = vec![0u8; VALUE_SIZE];
    rng.fill(&mut buf[..]);
    for b in &mut buf {
        if *b == 0 {
            *b = 1;
        }
    }
    buf
}

/// Opens a database with settings tuned for benchmarking.
fn open_bench_db(dir: &std::path::Path) -> Database {
    Database::open(
        dir,
        DbConfig {
            engine: EngineConfig {
                write_buffer_size: 256 * 1024,
                thread_pool_size: 2,
                ..EngineConfig::default()
            },
        },
    )
    .expect("open")
}

/// Load phase: inserts [`RECORD_COUNT`] sequential records.
fn load_database(db: &Database) {
    let mut rng = rand::rng();
    for i in 0..RECORD_COUNT {
        let key = make_key(i);
        let value = make_value(&mut rng);
        db.insert(key, value).unwrap();
    }
}

// --------------------------------------------------------------------------
// Workloads
// --------------------------------------------------------------------------

/// Workload A — 50% read, 50% update.
fn run_workload_a(db: &Database) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        let key = make_key(rng.random_range(0..RECORD_COUNT));
        if rng.random_bool(0.5) {
            let _ = black_box(db.find(&key).unwrap());
        } else {
            let value = make_value(&mut rng);
            db.insert(key, value).unwrap();
        }
    }
}

/// Workload B — 95% read, 5% update.
fn run_workload_b(db: &Database) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        let key = make_key(rng.random_range(0..RECORD_COUNT));
        if rng.random_bool(0.95) {
            let _ = black_box(db.find(&key).unwrap());
        } else {
            let value = make_value(&mut rng);
            db.insert(key, value).unwrap();
        }
    }
}

/// Workload C — 100% read.
fn run_workload_c(db: &Database) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        let key = make_key(rng.random_range(0..RECORD_COUNT));
        let _ = black_box(db.find(&key).unwrap());
    }
}

/// Workload D — 95% read, 5% insert (append-only new keys).
fn run_workload_d(db: &Database, insert_base: &mut u64) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        if rng.random_bool(0.95) {
            let key = make_key(rng.random_range(0..RECORD_COUNT + *insert_base));
            let _ = black_box(db.find(&key).unwrap());
        } else {
            let key = make_key(RECORD_COUNT + *insert_base);
            let value = make_value(&mut rng);
            db.insert(key, value).unwrap();
            *insert_base += 1;
        }
    }
}

/// Workload F — 50% read, 50% read-modify-write.
fn run_workload_f(db: &Database) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        let key = make_key(rng.random_range(0..RECORD_COUNT));
        if rng.random_bool(0.5) {
            let _ = black_box(db.find(&key).unwrap());
        } else {
            let _ = db.find(&key).unwrap();
            let value = make_value(&mut rng);
            db.insert(key, value).unwrap();
        }
    }
}

// --------------------------------------------------------------------------
// Criterion registration
// --------------------------------------------------------------------------

fn bench_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("ycsb/load");
    group.sample_size(10);
    group.bench_function(BenchmarkId::new("sequential", RECORD_COUNT), |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let db = open_bench_db(dir.path());
                (dir, db)
            },
            |(_dir, db)| {
                load_database(&db);
                db.close().unwrap();
            },
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

macro_rules! workload_bench {
    ($fn_name:ident, $label:expr, $runner:expr) => {
        fn $fn_name(c: &mut Criterion) {
            let mut group = c.benchmark_group("ycsb/workload");
            group.sample_size(10);
            group.bench_function($label, |b| {
                b.iter_batched(
                    || {
                        let dir = TempDir::new().unwrap();
                        let db = open_bench_db(dir.path());
                        load_database(&db);
                        (dir, db)
                    },
                    |(_dir, db)| $runner(&db),
                    BatchSize::PerIteration,
                );
            });
            group.finish();
        }
    };
}

workload_bench!(bench_workload_a, "A_50read_50update", run_workload_a);
workload_bench!(bench_workload_b, "B_95read_5update", run_workload_b);
workload_bench!(bench_workload_c, "C_100read", run_workload_c);
workload_bench!(bench_workload_f, "F_50read_50rmw", run_workload_f);

fn bench_workload_d(c: &mut Criterion) {
    let mut group = c.benchmark_group("ycsb/workload");
    group.sample_size(10);
    group.bench_function("D_95read_5insert", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let db = open_bench_db(dir.path());
                load_database(&db);
                (dir, db, 0u64)
            },
            |(_dir, db, mut insert_base)| run_workload_d(&db, &mut insert_base),
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_load,
    bench_workload_a,
    bench_workload_b,
    bench_workload_c,
    bench_workload_d,
    bench_workload_f,
);
criterion_main!(benches);
