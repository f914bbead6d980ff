//! Shared test helpers for integration tests.

use std::sync::Arc;
use std::time::Duration;

use sieve_core::mock::{make_block, pay_to};
use sieve_core::types::{Block, BlockHash, Transaction};
use sieve_node_lib::{Node, NodeConfig};
use sieve_wallet::AccountConfig;
use tempfile::TempDir;

/// A 20-byte pattern element derived from a seed.
pub fn element(seed: u8) -> [u8; 20] {
    [seed; 20]
}

/// `len` blocks on top of `parent`, each paying `value` to `to`. `salt`
/// keeps competing branches and their transactions distinct.
pub fn paying_chain(parent: BlockHash, len: u32, to: &[u8], value: u64, salt: u32) -> Vec<Block> {
    let mut prev = parent;
    (0..len)
        .map(|i| {
            let nonce = salt * 10_000 + i;
            let block = make_block(prev, nonce, vec![pay_to(to, value, nonce)]);
            prev = block.hash();
            block
        })
        .collect()
}

/// A block on top of `parent` carrying `transactions`.
pub fn block_with(parent: BlockHash, nonce: u32, transactions: Vec<Transaction>) -> Block {
    make_block(parent, nonce, transactions)
}

/// Node config in `dir` watching `external` and `internal` for account 0.
pub fn node_config(dir: &TempDir, external: &[&[u8]], internal: &[&[u8]]) -> NodeConfig {
    let mut config = NodeConfig {
        data_dir: dir.path().to_path_buf(),
        ..NodeConfig::default()
    };
    config.wallet.tick_interval = Duration::from_millis(10);
    config.wallet.download_limit = 3;
    config.wallet.accounts = vec![AccountConfig {
        account: 0,
        external: external.iter().map(hex::encode).collect(),
        internal: internal.iter().map(hex::encode).collect(),
    }];
    config
}

/// A node in a fresh temp directory watching `external` as receive patterns.
pub fn test_node(external: &[&[u8]]) -> (Arc<Node>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::open(node_config(&dir, external, &[])).unwrap();
    (node, dir)
}

/// Submit every block, header first.
pub fn feed(node: &Node, blocks: &[Block]) {
    for b in blocks {
        node.submit_block(b.clone()).unwrap();
    }
}

/// Poll `cond` every 10ms for up to five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Wait until every subchain of `node` has processed the best-chain tip.
pub async fn wait_synced(node: &Node) {
    let synced = wait_until(|| {
        let tip = node.best_block();
        node.subchains()
            .iter()
            .all(|s| s.last_processed == tip && s.is_idle())
    })
    .await;
    assert!(synced, "node did not sync: {:?}", node.subchains());
}
