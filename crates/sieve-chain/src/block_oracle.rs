//! Single source of block handles.
//!
//! [`BlockOracle::load`] answers from the memory cache, then the `Blocks`
//! table, then any download already in flight, and only then asks the
//! [`BlockFetcher`]. Downloads are resolved through [`BlockOracle::submit`]
//! or [`BlockOracle::fail`]; either way the hash is broadcast so actors
//! waiting on it can react.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use sieve_core::codec;
use sieve_core::constants::EVENT_CHANNEL_CAPACITY;
use sieve_core::future::{block_channel, BlockFuture, BlockPromise};
use sieve_core::traits::{BlockFetcher, BlockSource};
use sieve_core::types::{Block, BlockHash};
use sieve_storage::{Lmdb, Mode, Table, WriteFlags};

use crate::mem::Mem;

pub struct BlockOracle {
    cache: Mutex<Mem>,
    db: Arc<Lmdb>,
    downloads: DashMap<BlockHash, BlockPromise>,
    fetcher: Arc<dyn BlockFetcher>,
    available: broadcast::Sender<BlockHash>,
}

impl BlockOracle {
    pub fn new(db: Arc<Lmdb>, fetcher: Arc<dyn BlockFetcher>, cache_limit: usize) -> Self {
        let (available, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            cache: Mutex::new(Mem::new(cache_limit)),
            db,
            downloads: DashMap::new(),
            fetcher,
            available,
        }
    }

    /// Notifications for every hash whose download resolved, successfully
    /// or not.
    pub fn subscribe(&self) -> broadcast::Receiver<BlockHash> {
        self.available.subscribe()
    }

    // --- Cache passthrough ---

    pub fn find(&self, hash: &BlockHash) -> Option<BlockFuture> {
        self.cache.lock().find(hash)
    }

    /// Cache `future` under `hash` unless it is already cached.
    pub fn push(&self, hash: BlockHash, future: BlockFuture) {
        let mut cache = self.cache.lock();
        if !cache.contains(&hash) {
            cache.push(hash, future);
        }
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    // --- Monitoring ---

    /// Number of outstanding downloads.
    pub fn download_queue(&self) -> usize {
        self.downloads.len()
    }

    pub fn pending(&self) -> Vec<BlockHash> {
        self.downloads.iter().map(|e| *e.key()).collect()
    }

    // --- Lookup ---

    pub fn load(&self, hash: &BlockHash) -> BlockFuture {
        if hash.is_null() {
            return BlockFuture::failed("null block hash");
        }
        // Held until the download is registered, so a concurrent `submit`
        // either lands in the cache first or finds the promise to fulfil.
        let mut cache = self.cache.lock();
        if let Some(future) = cache.find(hash) {
            return future;
        }
        if let Some(block) = self.load_stored(hash) {
            let future = BlockFuture::ready(Arc::new(block));
            cache.push(*hash, future.clone());
            return future;
        }

        let (future, requested) = match self.downloads.entry(*hash) {
            Entry::Occupied(e) => (e.get().future(), false),
            Entry::Vacant(e) => {
                let (promise, future) = block_channel();
                e.insert(promise);
                (future, true)
            }
        };
        drop(cache);
        if requested {
            debug!(%hash, "block oracle: requesting download");
            self.fetcher.request(hash);
        }
        future
    }

    fn load_stored(&self, hash: &BlockHash) -> Option<Block> {
        let mut bytes = None;
        if !self
            .db
            .load(Table::Blocks, hash.as_bytes(), |v| bytes = Some(v.to_vec()), Mode::One)
        {
            return None;
        }
        match codec::decode(&bytes?) {
            Ok(block) => Some(block),
            Err(e) => {
                error!(%hash, "block oracle: corrupt stored block: {e}");
                None
            }
        }
    }

    // --- Download results ---

    /// Persist a downloaded block and resolve everyone waiting on it.
    /// Returns `false` if the block could not be stored; waiters are still
    /// resolved with the in-memory copy.
    pub fn submit(&self, block: Block) -> bool {
        let hash = block.hash();
        let stored = match codec::encode(&block) {
            Ok(bytes) => {
                let result = self.db.store(Table::Blocks, hash.as_bytes(), &bytes, None, WriteFlags::empty());
                if !result.success {
                    warn!(%hash, code = result.code, "block oracle: failed to store block");
                }
                result.success
            }
            Err(e) => {
                error!(%hash, "block oracle: failed to encode block: {e}");
                false
            }
        };

        let block = Arc::new(block);
        let promise = {
            let mut cache = self.cache.lock();
            if !cache.contains(&hash) {
                cache.push(hash, BlockFuture::ready(block.clone()));
            }
            self.downloads.remove(&hash).map(|(_, promise)| promise)
        };
        if let Some(promise) = promise {
            promise.fulfil(block);
        }
        debug!(%hash, stored, "block oracle: block available");
        let _ = self.available.send(hash);
        stored
    }

    /// Resolve an outstanding download as failed. A later `load` requests
    /// the block again.
    pub fn fail(&self, hash: &BlockHash, reason: &str) {
        match self.downloads.remove(hash) {
            Some((_, promise)) => {
                warn!(%hash, reason, "block oracle: download failed");
                promise.fail(reason);
                let _ = self.available.send(*hash);
            }
            None => debug!(%hash, "block oracle: failure for unknown download"),
        }
    }
}

impl BlockSource for BlockOracle {
    fn load(&self, hash: &BlockHash) -> BlockFuture {
        BlockOracle::load(self, hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_core::future::BlockOutcome;
    use sieve_core::mock::{make_chain, RecordingFetcher};
    use sieve_core::types::Hash256;
    use sieve_storage::StorageConfig;
    use tempfile::TempDir;

    fn setup(limit: usize) -> (TempDir, Arc<RecordingFetcher>, BlockOracle) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Lmdb::open(dir.path(), &StorageConfig::default()).unwrap());
        let fetcher = Arc::new(RecordingFetcher::default());
        let oracle = BlockOracle::new(db, fetcher.clone(), limit);
        (dir, fetcher, oracle)
    }

    #[test]
    fn unknown_block_is_requested_once() {
        let (_dir, fetcher, oracle) = setup(4);
        let hash = Hash256([7; 32]);
        let a = oracle.load(&hash);
        let b = oracle.load(&hash);
        assert!(a.poll().is_none());
        assert!(a.same_channel(&b));
        assert_eq!(fetcher.requests(), vec![hash]);
        assert_eq!(oracle.download_queue(), 1);
        assert_eq!(oracle.pending(), vec![hash]);
    }

    #[test]
    fn submit_resolves_waiters_and_caches() {
        let (_dir, fetcher, oracle) = setup(4);
        let block = make_chain(1, 0).remove(0);
        let hash = block.hash();
        let mut rx = oracle.subscribe();

        let future = oracle.load(&hash);
        assert!(oracle.submit(block.clone()));
        assert_eq!(future.block().unwrap().hash(), hash);
        assert_eq!(oracle.download_queue(), 0);
        assert_eq!(rx.try_recv().unwrap(), hash);

        assert!(oracle.find(&hash).is_some());
        assert!(oracle.load(&hash).is_ready());
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[test]
    fn concurrent_load_and_submit_leave_no_download_behind() {
        for round in 0..200u32 {
            let (_dir, _fetcher, oracle) = setup(4);
            let oracle = Arc::new(oracle);
            let block = make_chain(1, round).remove(0);
            let hash = block.hash();

            let loader = {
                let oracle = oracle.clone();
                std::thread::spawn(move || {
                    let mut last = oracle.load(&hash);
                    for _ in 0..50 {
                        last = oracle.load(&hash);
                    }
                    last
                })
            };
            oracle.submit(block);
            let last = loader.join().unwrap();

            assert!(last.is_ready(), "round {round}: load left waiting");
            assert_eq!(oracle.download_queue(), 0, "round {round}");
        }
    }

    #[test]
    fn stored_block_served_after_cache_clear() {
        let (_dir, fetcher, oracle) = setup(4);
        let block = make_chain(1, 0).remove(0);
        let hash = block.hash();
        oracle.submit(block);
        oracle.clear();
        assert!(oracle.find(&hash).is_none());

        let future = oracle.load(&hash);
        assert_eq!(future.block().unwrap().hash(), hash);
        assert!(fetcher.requests().is_empty());
        assert!(oracle.find(&hash).is_some());
    }

    #[test]
    fn failed_download_is_retried_on_next_load() {
        let (_dir, fetcher, oracle) = setup(4);
        let hash = Hash256([3; 32]);
        let mut rx = oracle.subscribe();
        let first = oracle.load(&hash);
        oracle.fail(&hash, "peer gone");

        assert!(matches!(first.poll(), Some(BlockOutcome::Failed(_))));
        assert_eq!(rx.try_recv().unwrap(), hash);
        assert!(oracle.find(&hash).is_none());

        let second = oracle.load(&hash);
        assert!(second.poll().is_none());
        assert_eq!(fetcher.requests(), vec![hash, hash]);
    }

    #[test]
    fn unsolicited_submit_is_cached() {
        let (_dir, _fetcher, oracle) = setup(4);
        let block = make_chain(1, 5).remove(0);
        let hash = block.hash();
        assert!(oracle.submit(block.clone()));
        assert!(oracle.submit(block));
        assert!(oracle.load(&hash).is_ready());
    }

    #[test]
    fn null_hash_fails_immediately() {
        let (_dir, fetcher, oracle) = setup(4);
        assert!(matches!(oracle.load(&Hash256::ZERO).poll(), Some(BlockOutcome::Failed(_))));
        assert!(fetcher.requests().is_empty());
    }

    #[test]
    fn pushed_future_is_found_not_fetched() {
        let (_dir, fetcher, oracle) = setup(4);
        let block = make_chain(1, 9).remove(0);
        let hash = block.hash();
        oracle.push(hash, BlockFuture::ready(Arc::new(block.clone())));
        oracle.push(hash, BlockFuture::failed("ignored"));

        assert!(oracle.find(&hash).unwrap().is_ready());
        assert!(oracle.load(&hash).is_ready());
        assert!(fetcher.requests().is_empty());
    }

    #[test]
    fn cache_respects_limit() {
        let (_dir, _fetcher, oracle) = setup(2);
        let blocks = make_chain(3, 0);
        for b in &blocks {
            oracle.submit(b.clone());
        }
        assert!(oracle.find(&blocks[0].hash()).is_none());
        assert!(oracle.find(&blocks[1].hash()).is_some());
        assert!(oracle.find(&blocks[2].hash()).is_some());
    }
}
