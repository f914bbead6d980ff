//! Criterion benchmarks for sieve-storage.
//!
//! Covers: single-key store, point load, queued batch commit and a forward
//! table scan.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

use sieve_storage::{Dir, Lmdb, Mode, StorageConfig, Table, WriteFlags};

fn open() -> (TempDir, Lmdb) {
    let dir = TempDir::new().unwrap();
    let db = Lmdb::open(dir.path(), &StorageConfig::default()).unwrap();
    (dir, db)
}

fn bench_store(c: &mut Criterion) {
    let (_dir, db) = open();
    let value = [0xABu8; 256];
    let mut i = 0u64;
    c.bench_function("store", |b| {
        b.iter(|| {
            i += 1;
            db.store(Table::Blocks, &i.to_be_bytes(), black_box(&value), None, WriteFlags::empty())
        })
    });
}

fn bench_load(c: &mut Criterion) {
    let (_dir, db) = open();
    for i in 0u64..1_000 {
        db.store(Table::Blocks, &i.to_be_bytes(), &[0u8; 256], None, WriteFlags::empty());
    }
    let key = 500u64.to_be_bytes();
    c.bench_function("load", |b| {
        b.iter(|| {
            let mut len = 0;
            db.load(Table::Blocks, black_box(&key), |v| len = v.len(), Mode::One);
            len
        })
    });
}

fn bench_commit_batch(c: &mut Criterion) {
    let (_dir, db) = open();
    c.bench_function("commit_100", |b| {
        b.iter(|| {
            for i in 0u64..100 {
                db.queue(Table::Unconfirmed, &i.to_be_bytes(), &[1u8; 64], Mode::One);
            }
            db.commit()
        })
    });
}

fn bench_scan(c: &mut Criterion) {
    let (_dir, db) = open();
    for i in 0u64..10_000 {
        db.queue(Table::Blocks, &i.to_be_bytes(), &[0u8; 32], Mode::One);
    }
    db.commit();
    c.bench_function("scan_10k", |b| {
        b.iter(|| {
            let mut count = 0u64;
            db.read(
                Table::Blocks,
                |_, _| {
                    count += 1;
                    true
                },
                Dir::Forward,
            );
            count
        })
    });
}

criterion_group!(benches, bench_store, bench_load, bench_commit_batch, bench_scan);
criterion_main!(benches);
