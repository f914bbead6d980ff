//! Criterion benchmarks for sieve-chain.
//!
//! Covers: block cache push with eviction, cache hit/miss lookups and header
//! linking.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

use sieve_chain::{HeaderOracle, Mem};
use sieve_core::future::BlockFuture;
use sieve_core::mock::make_chain;
use sieve_core::types::Hash256;
use sieve_storage::{Lmdb, StorageConfig};

fn hash(i: u64) -> Hash256 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&(i + 1).to_le_bytes());
    Hash256(bytes)
}

fn bench_mem_push(c: &mut Criterion) {
    let future = BlockFuture::failed("bench");
    c.bench_function("mem_push_evict", |b| {
        let mut mem = Mem::new(100);
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            mem.push(black_box(hash(i)), future.clone());
        })
    });
}

fn bench_mem_find(c: &mut Criterion) {
    let mut mem = Mem::new(1_000);
    for i in 0..1_000 {
        mem.push(hash(i), BlockFuture::failed("bench"));
    }
    c.bench_function("mem_find_hit", |b| b.iter(|| mem.find(black_box(&hash(500)))));
    c.bench_function("mem_find_miss", |b| b.iter(|| mem.find(black_box(&hash(5_000)))));
}

fn bench_add_header(c: &mut Criterion) {
    c.bench_function("add_100_headers", |b| {
        b.iter_with_setup(
            || {
                let dir = TempDir::new().unwrap();
                let db = Arc::new(Lmdb::open(dir.path(), &StorageConfig::default()).unwrap());
                (dir, HeaderOracle::open(db), make_chain(100, 0))
            },
            |(_dir, oracle, blocks)| {
                for block in blocks {
                    oracle.add_header(block.header).unwrap();
                }
            },
        )
    });
}

criterion_group!(benches, bench_mem_push, bench_mem_find, bench_add_header);
criterion_main!(benches);
