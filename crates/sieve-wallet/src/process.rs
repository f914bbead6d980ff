//! Per-subchain sync state machine.
//!
//! Every best-chain position above the last processed one sits in exactly
//! one of four sets:
//!
//! - **waiting**: known from the header oracle, block not yet requested
//! - **downloading**: block requested, handle outstanding
//! - **ready**: block in hand, not yet handed to matching
//! - **processing**: matching dispatched, result not yet applied
//!
//! [`Process::work`] moves positions forward under the download and
//! processing limits. Matching itself runs elsewhere: [`Process::queue_process`]
//! returns [`Job`]s and their results come back through
//! [`Process::finish_process`]. Results are applied to the store strictly in
//! height order.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use sieve_core::future::{BlockFuture, BlockOutcome};
use sieve_core::traits::{BlockSource, HeaderSource};
use sieve_core::types::{Block, BlockHash, Height, Pattern, Position, SubchainId, Transaction, Txid};

use crate::config::WalletConfig;
use crate::db::WalletDb;
use crate::matcher::{scan_block, scan_transaction, BlockScan};

/// A block handed to matching.
pub struct Job {
    pub id: u64,
    pub position: Position,
    pub block: Arc<Block>,
    patterns: Arc<Vec<Pattern>>,
}

impl Job {
    pub fn run(&self) -> BlockScan {
        scan_block(&self.block, &self.patterns)
    }
}

struct Slot {
    id: u64,
    position: Position,
    result: Option<BlockScan>,
}

/// Point-in-time view of one subchain's pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubchainStatus {
    pub subchain: SubchainId,
    pub last_processed: Position,
    pub waiting: usize,
    pub downloading: usize,
    pub ready: usize,
    pub processing: usize,
}

impl SubchainStatus {
    pub fn new(subchain: SubchainId) -> Self {
        Self {
            subchain,
            last_processed: Position::BLANK,
            waiting: 0,
            downloading: 0,
            ready: 0,
            processing: 0,
        }
    }

    /// True when nothing is queued anywhere in the pipeline.
    pub fn is_idle(&self) -> bool {
        self.waiting + self.downloading + self.ready + self.processing == 0
    }
}

pub struct Process {
    subchain: SubchainId,
    patterns: Arc<Vec<Pattern>>,
    download_limit: usize,
    process_limit: usize,
    headers: Arc<dyn HeaderSource>,
    blocks: Arc<dyn BlockSource>,
    db: Arc<WalletDb>,

    waiting: VecDeque<Position>,
    downloading: BTreeMap<Height, (Position, BlockFuture)>,
    downloading_index: HashMap<BlockHash, Height>,
    ready: BTreeMap<Height, (Position, Arc<Block>)>,
    processing: BTreeMap<Height, Slot>,
    /// Jobs dispatched before a reorg discarded their position.
    cancelled: HashSet<u64>,
    next_job: u64,
    /// Reorg parent whose store rollback has not succeeded yet. The marker
    /// stays put and nothing is queued until it does.
    unrolled: Option<Position>,

    last_processed: Position,
    txid_cache: HashSet<Txid>,
}

impl Process {
    pub fn new(
        subchain: SubchainId,
        patterns: Vec<Pattern>,
        config: &WalletConfig,
        headers: Arc<dyn HeaderSource>,
        blocks: Arc<dyn BlockSource>,
        db: Arc<WalletDb>,
    ) -> Self {
        Self {
            subchain,
            patterns: Arc::new(patterns),
            download_limit: config.download_limit,
            process_limit: config.process_limit,
            headers,
            blocks,
            db,
            waiting: VecDeque::new(),
            downloading: BTreeMap::new(),
            downloading_index: HashMap::new(),
            ready: BTreeMap::new(),
            processing: BTreeMap::new(),
            cancelled: HashSet::new(),
            next_job: 0,
            unrolled: None,
            last_processed: Position::BLANK,
            txid_cache: HashSet::new(),
        }
    }

    pub fn subchain(&self) -> SubchainId {
        self.subchain
    }

    pub fn last_processed(&self) -> Position {
        self.last_processed
    }

    pub fn status(&self) -> SubchainStatus {
        SubchainStatus {
            subchain: self.subchain,
            last_processed: self.last_processed,
            waiting: self.waiting.len(),
            downloading: self.downloading.len(),
            ready: self.ready.len(),
            processing: self.processing.len(),
        }
    }

    // --- Lifecycle ---

    /// Resume from the persisted marker and catch up with the best chain.
    pub fn do_startup(&mut self) {
        if let Some(position) = self.db.last_processed(self.subchain) {
            self.last_processed = position;
        }
        info!(subchain = %self.subchain, last_processed = %self.last_processed, "process: starting");
        self.process_update();
    }

    /// One scheduling step. Returns the matching jobs to run.
    pub fn work(&mut self) -> Vec<Job> {
        if self.retry_rollback() {
            return Vec::new();
        }
        self.advance();
        loop {
            self.queue_downloads();
            if self.check_cache() == 0 {
                break;
            }
        }
        self.queue_process()
    }

    // --- Pipeline steps ---

    /// Request blocks for waiting positions while under the download limit.
    pub fn queue_downloads(&mut self) -> usize {
        let mut queued = 0;
        while self.downloading.len() < self.download_limit {
            let Some(position) = self.waiting.pop_front() else {
                break;
            };
            let future = self.blocks.load(&position.hash);
            let clobbered = self.downloading_index.insert(position.hash, position.height);
            assert!(
                clobbered.is_none(),
                "process {}: block {} queued twice",
                self.subchain,
                position.hash
            );
            let clobbered = self.downloading.insert(position.height, (position, future));
            assert!(
                clobbered.is_none(),
                "process {}: height {} queued twice",
                self.subchain,
                position.height
            );
            trace!(subchain = %self.subchain, height = position.height, "process: downloading");
            queued += 1;
        }
        queued
    }

    /// Move every resolved download out of the downloading set. Returns how
    /// many became ready; failures go back to waiting.
    pub fn check_cache(&mut self) -> usize {
        let resolved: Vec<(Height, BlockOutcome)> = self
            .downloading
            .iter()
            .filter_map(|(height, (_, future))| future.poll().map(|o| (*height, o)))
            .collect();
        let mut ready = 0;
        for (height, outcome) in resolved {
            if self.resolve(height, outcome) {
                ready += 1;
            }
        }
        ready
    }

    fn resolve(&mut self, height: Height, outcome: BlockOutcome) -> bool {
        let Some((position, _)) = self.downloading.remove(&height) else {
            return false;
        };
        self.downloading_index.remove(&position.hash);
        match outcome {
            BlockOutcome::Ready(block) if block.hash() == position.hash => {
                debug!(subchain = %self.subchain, height, hash = %position.hash, "process: block ready");
                self.ready.insert(height, (position, block));
                true
            }
            BlockOutcome::Ready(block) => {
                warn!(subchain = %self.subchain, height, expected = %position.hash, got = %block.hash(), "process: wrong block delivered, retrying");
                self.waiting.push_back(position);
                false
            }
            BlockOutcome::Failed(reason) => {
                warn!(subchain = %self.subchain, height, hash = %position.hash, reason, "process: download failed, retrying");
                self.waiting.push_back(position);
                false
            }
        }
    }

    /// Dispatch ready blocks contiguous with the processed prefix.
    pub fn queue_process(&mut self) -> Vec<Job> {
        let mut jobs = Vec::new();
        while self.processing.len() < self.process_limit {
            let next = self
                .processing
                .last_key_value()
                .map_or(self.last_processed.height, |(height, _)| *height)
                + 1;
            let Some(entry) = self.ready.first_entry() else {
                break;
            };
            if *entry.key() != next {
                break;
            }
            let (position, block) = entry.remove();
            let id = self.next_job;
            self.next_job += 1;
            self.processing.insert(
                position.height,
                Slot {
                    id,
                    position,
                    result: None,
                },
            );
            jobs.push(Job {
                id,
                position,
                block,
                patterns: self.patterns.clone(),
            });
        }
        jobs
    }

    /// Record a matching result and apply every contiguous completed result.
    /// Returns how many positions the marker advanced.
    ///
    /// # Panics
    ///
    /// If `id` was never dispatched for `position` and was not cancelled.
    pub fn finish_process(&mut self, id: u64, position: Position, scan: BlockScan) -> usize {
        if self.cancelled.remove(&id) {
            debug!(subchain = %self.subchain, height = position.height, "process: dropping cancelled result");
            return 0;
        }
        match self.processing.get_mut(&position.height) {
            Some(slot) if slot.id == id && slot.position == position => slot.result = Some(scan),
            _ => panic!(
                "process {}: result for {} which is not processing",
                self.subchain, position
            ),
        }
        self.advance()
    }

    fn advance(&mut self) -> usize {
        let mut advanced = 0;
        while let Some(mut entry) = self.processing.first_entry() {
            let Some(scan) = entry.get_mut().result.take() else {
                break;
            };
            let position = entry.get().position;
            match self.db.apply_block(self.subchain, position, &scan) {
                Ok(applied) => {
                    entry.remove();
                    self.txid_cache.extend(applied.txids);
                    self.last_processed = position;
                    advanced += 1;
                }
                Err(e) => {
                    error!(subchain = %self.subchain, height = position.height, "process: failed to apply block: {e}");
                    entry.get_mut().result = Some(scan);
                    break;
                }
            }
        }
        if advanced > 0 {
            debug!(subchain = %self.subchain, height = self.last_processed.height, advanced, "process: marker advanced");
        }
        advanced
    }

    // --- Events ---

    /// A download resolved. Hashes no longer downloading are ignored.
    pub fn process_block(&mut self, hash: &BlockHash) -> bool {
        let Some(&height) = self.downloading_index.get(hash) else {
            trace!(subchain = %self.subchain, %hash, "process: block not downloading");
            return false;
        };
        let outcome = self.downloading.get(&height).and_then(|(_, future)| future.poll());
        match outcome {
            Some(outcome) => {
                self.resolve(height, outcome);
                true
            }
            None => false,
        }
    }

    /// Match an unconfirmed transaction. Returns true if it was recorded.
    pub fn process_mempool(&mut self, tx: &Transaction) -> bool {
        let txid = tx.txid();
        if !self.txid_cache.insert(txid) {
            trace!(subchain = %self.subchain, %txid, "process: transaction already seen");
            return false;
        }
        let mut scan = BlockScan::default();
        scan_transaction(tx, &self.patterns, &mut scan);
        let relevant = !scan.received.is_empty()
            || scan
                .spends
                .iter()
                .any(|s| self.db.is_owned_unspent(&s.outpoint, self.subchain));
        if !relevant {
            return false;
        }
        match self.db.record_unconfirmed(tx) {
            Ok(()) => {
                debug!(subchain = %self.subchain, %txid, "process: unconfirmed match");
                true
            }
            Err(e) => {
                warn!(subchain = %self.subchain, %txid, "process: failed to record unconfirmed: {e}");
                false
            }
        }
    }

    /// Discard everything above `parent`, roll the marker back to it and
    /// requeue up to the tip. If the store cannot roll back, the marker stays
    /// where it is and the rollback is retried by the next update or work
    /// step.
    pub fn process_reorg(&mut self, parent: Position) {
        let parent = match self.unrolled {
            Some(earlier) if earlier.height < parent.height => earlier,
            _ => parent,
        };
        let above = parent.height + 1;
        self.waiting.retain(|p| p.height < above);
        for (_, (position, _)) in self.downloading.split_off(&above) {
            self.downloading_index.remove(&position.hash);
        }
        self.ready.split_off(&above);
        for (_, slot) in self.processing.split_off(&above) {
            if slot.result.is_none() {
                self.cancelled.insert(slot.id);
            }
        }

        if self.last_processed.height >= above {
            match self.db.rollback(self.subchain, parent) {
                Ok(removed) => {
                    info!(subchain = %self.subchain, from = self.last_processed.height, to = parent.height, removed, "process: reorg");
                    self.unrolled = None;
                    self.last_processed = parent;
                }
                Err(e) => {
                    error!(subchain = %self.subchain, to = parent.height, "process: failed to roll back, will retry: {e}");
                    self.unrolled = Some(parent);
                    return;
                }
            }
        } else {
            debug!(subchain = %self.subchain, parent = %parent, "process: reorg above marker");
        }
        self.extend_waiting();
    }

    /// Re-read the best chain: reorg if anything queued or processed left
    /// it, then queue new heights up to the tip.
    pub fn process_update(&mut self) {
        if self.retry_rollback() {
            return;
        }
        if !self.headers.is_in_best_chain(&self.last_processed) {
            let parent = self.headers.common_parent(&self.last_processed);
            self.process_reorg(parent);
            return;
        }
        if let Some(height) = self.lowest_stale() {
            let parent = match self.headers.best_hash(height - 1) {
                Some(hash) => Position::new(height - 1, hash),
                None => self.last_processed,
            };
            self.process_reorg(parent);
            return;
        }
        self.extend_waiting();
    }

    /// Retry an outstanding rollback. Returns true while it is still
    /// outstanding.
    fn retry_rollback(&mut self) -> bool {
        let Some(parent) = self.unrolled else {
            return false;
        };
        self.process_reorg(parent);
        self.unrolled.is_some()
    }

    /// Lowest queued height whose position is off the best chain.
    fn lowest_stale(&self) -> Option<Height> {
        self.positions()
            .filter(|p| !self.headers.is_in_best_chain(p))
            .map(|p| p.height)
            .min()
    }

    fn positions(&self) -> impl Iterator<Item = &Position> {
        self.waiting
            .iter()
            .chain(self.downloading.values().map(|(p, _)| p))
            .chain(self.ready.values().map(|(p, _)| p))
            .chain(self.processing.values().map(|s| &s.position))
    }

    fn extend_waiting(&mut self) {
        let tip = self.headers.best_chain();
        let top = self
            .positions()
            .map(|p| p.height)
            .max()
            .unwrap_or(self.last_processed.height)
            .max(self.last_processed.height);
        let mut queued = 0;
        for height in (top + 1)..=tip.height {
            let Some(hash) = self.headers.best_hash(height) else {
                break;
            };
            self.waiting.push_back(Position::new(height, hash));
            queued += 1;
        }
        if queued > 0 {
            debug!(subchain = %self.subchain, tip = tip.height, queued, "process: new heights waiting");
        }
    }

    /// Check that every height from the marker to `tip` is held exactly once
    /// and the download index matches the downloading set.
    pub fn verify(&self, tip: Height) -> Result<(), String> {
        if let Some(parent) = self.unrolled {
            if self.positions().next().is_some() {
                return Err(format!("{}: queued work while rolling back to {}", self.subchain, parent));
            }
            return Ok(());
        }
        let mut heights: Vec<Height> = self.positions().map(|p| p.height).collect();
        heights.sort_unstable();
        let expected: Vec<Height> = ((self.last_processed.height + 1)..=tip).collect();
        if heights != expected {
            return Err(format!(
                "{}: heights {:?} do not cover {}..={}",
                self.subchain,
                heights,
                self.last_processed.height + 1,
                tip
            ));
        }
        if self.downloading_index.len() != self.downloading.len()
            || self
                .downloading
                .iter()
                .any(|(h, (p, _))| self.downloading_index.get(&p.hash) != Some(h))
        {
            return Err(format!("{}: download index out of sync", self.subchain));
        }
        Ok(())
    }
}
