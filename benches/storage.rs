// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Benchmarks for store primitives.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tempfile::TempDir;
use tuplekv::storage::{KvStore, RocksStore, Row, ScanRange, SqliteStore, StorageError};
use tuplekv::{pack_key, kv_key, ValueEncoding, Versionstamp};

fn row(i: u64) -> Row {
    Row {
        key: pack_key(&kv_key!["key", i]).unwrap(),
        value: vec![0u8; 100],
        encoding: ValueEncoding::Bytes,
        versionstamp: Versionstamp::from_version(i + 1).unwrap(),
        expires_at: None,
    }
}

fn populate<S: KvStore>(store: &S, count: u64) {
    store
        .run_atomic(|txn| {
            for i in 0..count {
                txn.put_row(row(i))?;
            }
            txn.set_version(count)
        })
        .unwrap();
}

fn bench_store<S: KvStore>(c: &mut Criterion, name: &str, store: &S) {
    populate(store, 10_000);

    let mut group = c.benchmark_group(format!("storage/{name}"));
    group.throughput(Throughput::Elements(1));

    group.bench_function("point_read", |b| {
        b.iter_batched(
            || pack_key(&kv_key!["key", rand::random::<u64>() % 10_000]).unwrap(),
            |key| store.get_row(&key).unwrap(),
            BatchSize::SmallInput,
        )
    });

    let counter = std::sync::atomic::AtomicU64::new(10_000);
    group.bench_function("point_write", |b| {
        b.iter(|| {
            let i = counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            store
                .run_atomic(|txn| {
                    let version = txn.version()? + 1;
                    txn.put_row(row(i))?;
                    txn.set_version(version)?;
                    Ok::<_, StorageError>(())
                })
                .unwrap()
        })
    });

    let range = ScanRange {
        start: pack_key(&kv_key!["key"]).unwrap(),
        end: vec![0xff],
        limit: 100,
        reverse: false,
    };
    group.bench_function("scan_100", |b| b.iter(|| store.scan(&range).unwrap()));

    let reverse = ScanRange {
        limit: 1000,
        reverse: true,
        ..range.clone()
    };
    group.bench_function("scan_1000_reverse", |b| {
        b.iter(|| store.scan(&reverse).unwrap())
    });

    group.throughput(Throughput::Elements(100));
    group.bench_function("batch_write_100", |b| {
        b.iter(|| {
            let base = counter.fetch_add(100, std::sync::atomic::Ordering::Relaxed);
            store
                .run_atomic(|txn| {
                    for i in base..base + 100 {
                        txn.put_row(row(i))?;
                    }
                    Ok::<_, StorageError>(())
                })
                .unwrap()
        })
    });

    group.finish();
}

fn bench_sqlite(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("bench.sqlite3")).unwrap();
    bench_store(c, "sqlite", &store);
}

fn bench_rocks(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    bench_store(c, "rocks", &store);
}

criterion_group!(benches, bench_sqlite, bench_rocks);
criterion_main!(benches);
