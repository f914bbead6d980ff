//! Bounded in-memory block cache.
//!
//! Entries live in a queue in insertion order; the index maps each hash to
//! the entry's sequence number. Sequence numbers are stable: the entry with
//! sequence `s` sits at `queue[s - head]`, so evicting from the front never
//! invalidates the index. Eviction is strictly first-in first-out and lookups
//! do not refresh an entry.

use std::collections::{HashMap, VecDeque};

use sieve_core::future::BlockFuture;
use sieve_core::types::BlockHash;

pub struct Mem {
    limit: usize,
    queue: VecDeque<(BlockHash, BlockFuture)>,
    index: HashMap<BlockHash, u64>,
    /// Sequence number of `queue[0]`.
    head: u64,
}

impl Mem {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            queue: VecDeque::with_capacity(limit.saturating_add(1)),
            index: HashMap::with_capacity(limit.saturating_add(1)),
            head: 0,
        }
    }

    /// Insert `future` under `hash`, evicting the oldest entries beyond the
    /// limit. A null hash is ignored.
    ///
    /// # Panics
    ///
    /// If `hash` is already cached.
    pub fn push(&mut self, hash: BlockHash, future: BlockFuture) {
        if hash.is_null() {
            return;
        }
        let seq = self.head + self.queue.len() as u64;
        let clobbered = self.index.insert(hash, seq);
        assert!(clobbered.is_none(), "mem: block {hash} pushed twice");
        self.queue.push_back((hash, future));

        while self.queue.len() > self.limit {
            if let Some((evicted, _)) = self.queue.pop_front() {
                self.index.remove(&evicted);
                self.head += 1;
            }
        }
    }

    pub fn find(&self, hash: &BlockHash) -> Option<BlockFuture> {
        if hash.is_null() {
            return None;
        }
        let seq = *self.index.get(hash)?;
        let slot = (seq - self.head) as usize;
        self.queue.get(slot).map(|(_, future)| future.clone())
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.index.contains_key(hash)
    }

    pub fn clear(&mut self) {
        self.head += self.queue.len() as u64;
        self.queue.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
