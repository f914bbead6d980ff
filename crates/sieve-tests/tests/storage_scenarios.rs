//! Storage and cache scenarios across the storage and chain crates.

use std::sync::Arc;

use sieve_chain::BlockOracle;
use sieve_core::mock::{make_chain, RecordingFetcher};
use sieve_storage::{Lmdb, Mode, StorageConfig, Table, WriteFlags};
use tempfile::TempDir;

fn open() -> (TempDir, Arc<Lmdb>) {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Lmdb::open(dir.path(), &StorageConfig::default()).unwrap());
    (dir, db)
}

fn load_all(db: &Lmdb, table: Table, key: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    db.load(table, key, |v| out.push(v.to_vec()), Mode::Multiple);
    out
}

// ======================================================================
// Block cache: oldest blocks fall out first, the store still serves them.
// ======================================================================

#[test]
fn cache_evicts_oldest_but_store_keeps_block() {
    let (_dir, db) = open();
    let fetcher = Arc::new(RecordingFetcher::default());
    let oracle = BlockOracle::new(db, fetcher.clone(), 2);
    let blocks = make_chain(3, 11);
    for b in &blocks {
        assert!(oracle.submit(b.clone()));
    }

    assert!(oracle.find(&blocks[0].hash()).is_none());
    assert!(oracle.find(&blocks[1].hash()).is_some());
    assert!(oracle.find(&blocks[2].hash()).is_some());

    // Evicted from memory, reloaded from disk without a download.
    let future = oracle.load(&blocks[0].hash());
    assert_eq!(future.block().unwrap().hash(), blocks[0].hash());
    assert!(fetcher.requests().is_empty());
    assert_eq!(oracle.download_queue(), 0);
}

#[test]
fn unknown_block_requested_once() {
    let (_dir, db) = open();
    let fetcher = Arc::new(RecordingFetcher::default());
    let oracle = BlockOracle::new(db, fetcher.clone(), 4);
    let block = make_chain(1, 12).pop().unwrap();
    let hash = block.hash();

    let first = oracle.load(&hash);
    let second = oracle.load(&hash);
    assert!(!first.is_ready());
    assert_eq!(fetcher.requests(), vec![hash]);
    assert_eq!(oracle.pending(), vec![hash]);

    oracle.submit(block);
    assert!(first.is_ready());
    assert!(second.is_ready());
    assert_eq!(oracle.download_queue(), 0);
}

// ======================================================================
// Duplicate tables: one key, many values.
// ======================================================================

#[test]
fn duplicate_table_keeps_every_value() {
    let (_dir, db) = open();
    for value in [&b"b"[..], b"a", b"c"] {
        let result = db.store(Table::OutputsByHeight, b"k", value, None, WriteFlags::empty());
        assert!(result.success);
    }

    assert_eq!(
        load_all(&db, Table::OutputsByHeight, b"k"),
        vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
    );
    assert!(db.exists_value(Table::OutputsByHeight, b"k", b"b"));
    assert!(db.delete_value(Table::OutputsByHeight, b"k", b"b", None));
    assert!(!db.exists_value(Table::OutputsByHeight, b"k", b"b"));
    assert!(db.exists(Table::OutputsByHeight, b"k"));
}

#[test]
fn primary_table_overwrites() {
    let (_dir, db) = open();
    db.store(Table::Unconfirmed, b"k", b"a", None, WriteFlags::empty());
    db.store(Table::Unconfirmed, b"k", b"b", None, WriteFlags::empty());
    assert_eq!(load_all(&db, Table::Unconfirmed, b"k"), vec![b"b".to_vec()]);
}

// ======================================================================
// Transactions: nothing lands unless the caller commits.
// ======================================================================

#[test]
fn dropped_write_transaction_leaves_store_untouched() {
    let (_dir, db) = open();
    {
        let mut txn = db.transaction_rw(None).unwrap();
        let result = db.store(Table::Unconfirmed, b"a", b"1", Some(&mut txn), WriteFlags::empty());
        assert!(result.success);
        let result = db.store(Table::Unconfirmed, b"b", b"2", Some(&mut txn), WriteFlags::empty());
        assert!(result.success);
    }
    assert!(!db.exists(Table::Unconfirmed, b"a"));
    assert!(!db.exists(Table::Unconfirmed, b"b"));
}

#[test]
fn committed_write_transaction_is_visible() {
    let (_dir, db) = open();
    let mut txn = db.transaction_rw(None).unwrap();
    db.store(Table::Unconfirmed, b"a", b"1", Some(&mut txn), WriteFlags::empty());
    assert!(!db.delete(Table::Unconfirmed, b"missing", Some(&mut txn)));
    assert!(txn.finalize(Some(true)));
    assert!(db.exists(Table::Unconfirmed, b"a"));
}

// ======================================================================
// Queued writes: batched into one transaction by commit.
// ======================================================================

#[test]
fn queue_then_commit_lands_batch() {
    let (_dir, db) = open();
    assert!(db.queue(Table::SpentByHeight, b"h", b"x", Mode::Multiple));
    assert!(db.queue(Table::SpentByHeight, b"h", b"y", Mode::Multiple));
    assert!(db.queue(Table::Unconfirmed, b"t", b"1", Mode::One));
    assert_eq!(db.pending(), 3);
    assert!(!db.exists(Table::Unconfirmed, b"t"));

    assert!(db.commit());
    assert_eq!(db.pending(), 0);
    assert_eq!(
        load_all(&db, Table::SpentByHeight, b"h"),
        vec![b"x".to_vec(), b"y".to_vec()]
    );
    assert!(db.exists(Table::Unconfirmed, b"t"));
    assert!(!db.commit());
}

#[test]
fn queued_single_mode_replaces_duplicates() {
    let (_dir, db) = open();
    db.store(Table::SpentByHeight, b"h", b"old1", None, WriteFlags::empty());
    db.store(Table::SpentByHeight, b"h", b"old2", None, WriteFlags::empty());
    db.queue(Table::SpentByHeight, b"h", b"new", Mode::One);
    assert!(db.commit());
    assert_eq!(load_all(&db, Table::SpentByHeight, b"h"), vec![b"new".to_vec()]);
}
