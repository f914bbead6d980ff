//! Node composition.
//!
//! The [`Node`] owns the LMDB environment, the header and block oracles and
//! the wallet. Headers, blocks and mempool transactions enter through the
//! `submit_*` methods; everything else is a read-only query.

use std::sync::Arc;

use tracing::{debug, info, warn};

use sieve_chain::{BlockOracle, ChainEvent, HeaderOracle};
use sieve_core::traits::{BlockFetcher, HeaderSource};
use sieve_core::types::{Block, BlockHash, BlockHeader, Height, Position, Transaction, Txid};
use sieve_storage::Lmdb;
use sieve_wallet::{SubchainStatus, Wallet};

use crate::config::NodeConfig;
use crate::error::NodeError;

/// Fetcher for a node without networking: requests are only logged, and
/// the blocks are expected through [`Node::submit_block`]. Outstanding
/// hashes are listed by [`Node::download_queue`].
pub struct IngestFetcher;

impl BlockFetcher for IngestFetcher {
    fn request(&self, hash: &BlockHash) {
        debug!(%hash, "node: block wanted");
    }
}

/// Monitoring snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStats {
    /// Best-chain height, `-1` before the first header.
    pub header_height: Height,
    /// Known headers, side branches included.
    pub headers: usize,
    /// Height every subchain has processed up to.
    pub wallet_height: Height,
    /// Outstanding block downloads.
    pub download_queue: usize,
    pub balance: u64,
    pub unconfirmed: usize,
}

pub struct Node {
    config: NodeConfig,
    db: Arc<Lmdb>,
    headers: Arc<HeaderOracle>,
    blocks: Arc<BlockOracle>,
    wallet: Wallet,
}

impl Node {
    /// Open storage and start the wallet. Must be called inside a tokio
    /// runtime.
    pub fn open(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        Self::with_fetcher(config, Arc::new(IngestFetcher))
    }

    /// Like [`Node::open`] with a custom download collaborator.
    pub fn with_fetcher(
        config: NodeConfig,
        fetcher: Arc<dyn BlockFetcher>,
    ) -> Result<Arc<Self>, NodeError> {
        config.validate()?;
        let db = Arc::new(Lmdb::open(config.db_path(), &config.storage)?);
        let headers = Arc::new(HeaderOracle::open(db.clone()));
        let blocks = Arc::new(BlockOracle::new(db.clone(), fetcher, config.wallet.cache_limit));
        let wallet = Wallet::start(&config.wallet, db.clone(), headers.clone(), blocks.clone())?;
        info!(
            height = headers.height(),
            subchains = wallet.subchains().len(),
            "node: opened"
        );
        Ok(Arc::new(Self {
            config,
            db,
            headers,
            blocks,
            wallet,
        }))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<Lmdb> {
        &self.db
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    // --- Queries ---

    pub fn best_block(&self) -> Position {
        self.headers.best_chain()
    }

    pub fn chain_stats(&self) -> ChainStats {
        ChainStats {
            header_height: self.headers.height(),
            headers: self.headers.header_count(),
            wallet_height: self.wallet.sync_height(),
            download_queue: self.blocks.download_queue(),
            balance: self.wallet.balance(),
            unconfirmed: self.wallet.unconfirmed().len(),
        }
    }

    /// A known header with its height and whether it is on the best chain.
    pub fn header(&self, hash: &BlockHash) -> Option<(BlockHeader, Position, bool)> {
        let (header, height) = self.headers.header(hash)?;
        let position = Position::new(height, *hash);
        let best = self.headers.is_in_best_chain(&position);
        Some((header, position, best))
    }

    pub fn download_queue(&self) -> Vec<BlockHash> {
        self.blocks.pending()
    }

    pub fn subchains(&self) -> Vec<SubchainStatus> {
        self.wallet.subchains()
    }

    pub fn balance(&self) -> u64 {
        self.wallet.balance()
    }

    // --- Ingest ---

    pub fn submit_header(&self, header: BlockHeader) -> Result<Option<ChainEvent>, NodeError> {
        Ok(self.headers.add_header(header)?)
    }

    /// Accept a block, linking its header first if it is new.
    pub fn submit_block(&self, block: Block) -> Result<BlockHash, NodeError> {
        let hash = block.hash();
        if self.headers.header(&hash).is_none() {
            self.headers.add_header(block.header.clone())?;
        }
        if !self.blocks.submit(block) {
            warn!(%hash, "node: block served from memory only");
        }
        Ok(hash)
    }

    /// Hand a mempool transaction to the wallet. Returns its txid and the
    /// number of subchains that received it.
    pub fn submit_transaction(&self, tx: Transaction) -> (Txid, usize) {
        let txid = tx.txid();
        let delivered = self.wallet.submit_transaction(tx);
        (txid, delivered)
    }

    pub async fn shutdown(&self) {
        self.wallet.shutdown().await;
        info!("node: stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_core::error::{ChainError, SieveError};
    use sieve_core::mock::{make_block, make_chain, pay_to};
    use sieve_core::types::Hash256;
    use sieve_wallet::AccountConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    const ELEMENT: [u8; 8] = [7; 8];

    fn open() -> (TempDir, Arc<Node>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            ..NodeConfig::default()
        };
        config.wallet.tick_interval = Duration::from_millis(10);
        config.wallet.accounts = vec![AccountConfig {
            account: 0,
            external: vec![hex::encode(ELEMENT)],
            internal: vec![],
        }];
        let node = Node::open(config).unwrap();
        (dir, node)
    }

    #[tokio::test]
    async fn fresh_node_is_empty() {
        let (_dir, node) = open();
        let stats = node.chain_stats();
        assert_eq!(stats.header_height, -1);
        assert_eq!(stats.headers, 0);
        assert_eq!(stats.download_queue, 0);
        assert_eq!(stats.balance, 0);
        assert!(node.best_block().is_blank());
        assert_eq!(node.subchains().len(), 1);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn header_first_then_block() {
        let (_dir, node) = open();
        let block = make_block(Hash256::ZERO, 0, vec![pay_to(&ELEMENT, 12, 0)]);
        let event = node.submit_header(block.header.clone()).unwrap();
        assert_eq!(event, Some(ChainEvent::NewTip(Position::new(0, block.hash()))));

        for _ in 0..200 {
            if !node.download_queue().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(node.download_queue(), vec![block.hash()]);

        assert_eq!(node.submit_block(block).unwrap(), node.best_block().hash);
        for _ in 0..200 {
            if node.chain_stats().wallet_height == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let stats = node.chain_stats();
        assert_eq!(stats.wallet_height, 0);
        assert_eq!(stats.balance, 12);
        assert_eq!(stats.download_queue, 0);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn header_lookup_reports_branch() {
        let (_dir, node) = open();
        let main = make_chain(2, 1);
        for b in &main {
            node.submit_header(b.header.clone()).unwrap();
        }
        let side = make_block(main[0].hash(), 77, vec![]);
        assert_eq!(node.submit_header(side.header.clone()).unwrap(), None);

        let (_, position, best) = node.header(&main[1].hash()).unwrap();
        assert_eq!(position.height, 1);
        assert!(best);
        let (header, position, best) = node.header(&side.hash()).unwrap();
        assert_eq!(header, side.header);
        assert_eq!(position.height, 1);
        assert!(!best);
        assert!(node.header(&Hash256([3; 32])).is_none());
        node.shutdown().await;
    }

    #[tokio::test]
    async fn orphan_block_rejected() {
        let (_dir, node) = open();
        let orphan = make_chain(2, 3).pop().unwrap();
        let err = node.submit_block(orphan).unwrap_err();
        assert!(matches!(
            err,
            NodeError::Core(SieveError::Chain(ChainError::UnknownParent(_)))
        ));
        assert_eq!(node.chain_stats().headers, 0);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn mempool_transaction_reaches_wallet() {
        let (_dir, node) = open();
        let tx = pay_to(&ELEMENT, 3, 99);
        let (txid, delivered) = node.submit_transaction(tx.clone());
        assert_eq!(txid, tx.txid());
        assert_eq!(delivered, 1);
        node.shutdown().await;
    }
}
