//! In-memory collaborators for tests in this and downstream crates.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::traits::{BlockFetcher, HeaderSource};
use crate::types::{
    Block, BlockHash, BlockHeader, Hash256, Height, OutPoint, Position, Transaction, TxInput,
    TxOutput,
};

/// Build a block on top of `prev` carrying `transactions`.
pub fn make_block(prev: BlockHash, nonce: u32, transactions: Vec<Transaction>) -> Block {
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash: prev,
            merkle_root: Hash256::ZERO,
            timestamp: 1_700_000_000 + nonce,
            bits: 0,
            nonce,
        },
        transactions,
    }
}

/// A linear chain of `len` empty blocks starting at genesis. `salt` makes
/// competing branches distinct.
pub fn make_chain(len: usize, salt: u32) -> Vec<Block> {
    extend_chain(Hash256::ZERO, len, salt)
}

/// `len` empty blocks built on top of `parent`.
pub fn extend_chain(parent: BlockHash, len: usize, salt: u32) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(len);
    let mut prev = parent;
    for i in 0..len {
        let block = make_block(prev, salt.wrapping_mul(1_000_003).wrapping_add(i as u32), vec![]);
        prev = block.hash();
        blocks.push(block);
    }
    blocks
}

/// A transaction paying `value` to a script embedding `element`.
pub fn pay_to(element: &[u8], value: u64, salt: u32) -> Transaction {
    let mut script = vec![0x76, 0xA9];
    script.extend_from_slice(element);
    script.push(0x88);
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            script_sig: salt.to_le_bytes().to_vec(),
        }],
        outputs: vec![TxOutput { value, script }],
        lock_time: 0,
    }
}

/// A transaction spending `outpoint` to an unrelated script.
pub fn spend(outpoint: OutPoint, value: u64) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: outpoint,
            script_sig: vec![0x01],
        }],
        outputs: vec![TxOutput {
            value,
            script: vec![0x51],
        }],
        lock_time: 0,
    }
}

/// A header source over a mutable list of best-chain hashes plus any
/// number of side-branch hashes registered with their fork height.
#[derive(Default)]
pub struct MockChain {
    best: RwLock<Vec<BlockHash>>,
    side: RwLock<Vec<(Position, Height)>>,
}

impl MockChain {
    pub fn new(blocks: &[Block]) -> Arc<Self> {
        let chain = Self::default();
        chain.set_best(blocks);
        Arc::new(chain)
    }

    /// Replace the best chain.
    pub fn set_best(&self, blocks: &[Block]) {
        *self.best.write() = blocks.iter().map(Block::hash).collect();
    }

    /// Record `position` as a known block whose history forks from the best
    /// chain after `fork_height`.
    pub fn add_side(&self, position: Position, fork_height: Height) {
        self.side.write().push((position, fork_height));
    }

    pub fn position(&self, height: Height) -> Option<Position> {
        self.best_hash(height).map(|hash| Position::new(height, hash))
    }
}

impl HeaderSource for MockChain {
    fn best_chain(&self) -> Position {
        let best = self.best.read();
        match best.last() {
            Some(hash) => Position::new(best.len() as Height - 1, *hash),
            None => Position::BLANK,
        }
    }

    fn best_hash(&self, height: Height) -> Option<BlockHash> {
        if height < 0 {
            return None;
        }
        self.best.read().get(height as usize).copied()
    }

    fn common_parent(&self, position: &Position) -> Position {
        if self.is_in_best_chain(position) {
            return *position;
        }
        let fork = self
            .side
            .read()
            .iter()
            .find(|(p, _)| p == position)
            .map(|(_, fork)| *fork);
        match fork.and_then(|h| self.position(h)) {
            Some(parent) => parent,
            None => Position::BLANK,
        }
    }
}

/// Records every requested hash.
#[derive(Default)]
pub struct RecordingFetcher {
    requests: Mutex<Vec<BlockHash>>,
}

impl RecordingFetcher {
    pub fn requests(&self) -> Vec<BlockHash> {
        self.requests.lock().clone()
    }

    pub fn take(&self) -> Vec<BlockHash> {
        std::mem::take(&mut *self.requests.lock())
    }
}

impl BlockFetcher for RecordingFetcher {
    fn request(&self, hash: &BlockHash) {
        self.requests.lock().push(*hash);
    }
}
