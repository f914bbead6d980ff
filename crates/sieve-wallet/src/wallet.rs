//! One actor per configured subchain, plus wallet-wide queries.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use sieve_chain::{BlockOracle, HeaderOracle};
use sieve_core::types::{Height, Transaction, Txid};
use sieve_storage::Lmdb;

use crate::actor::{SubchainActor, SubchainHandle, SubchainMessage};
use crate::config::WalletConfig;
use crate::db::WalletDb;
use crate::error::WalletError;
use crate::process::{Process, SubchainStatus};

pub struct Wallet {
    db: Arc<WalletDb>,
    handles: Vec<SubchainHandle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Wallet {
    /// Spawn an actor for every configured subchain. Must be called inside
    /// a tokio runtime.
    pub fn start(
        config: &WalletConfig,
        lmdb: Arc<Lmdb>,
        headers: Arc<HeaderOracle>,
        blocks: Arc<BlockOracle>,
    ) -> Result<Self, WalletError> {
        config.validate()?;
        let db = Arc::new(WalletDb::new(lmdb));
        let mut handles = Vec::new();
        let mut tasks = Vec::new();
        for (subchain, patterns) in config.subchains()? {
            let process = Process::new(
                subchain,
                patterns,
                config,
                headers.clone(),
                blocks.clone(),
                db.clone(),
            );
            let (actor, handle) = SubchainActor::new(
                process,
                headers.subscribe(),
                blocks.subscribe(),
                config.tick_interval,
            );
            tasks.push(actor.spawn());
            handles.push(handle);
        }
        info!(subchains = handles.len(), "wallet: started");
        Ok(Self {
            db,
            handles,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn db(&self) -> &Arc<WalletDb> {
        &self.db
    }

    pub fn subchains(&self) -> Vec<SubchainStatus> {
        self.handles.iter().map(SubchainHandle::status).collect()
    }

    /// Confirmed unspent value across all subchains.
    pub fn balance(&self) -> u64 {
        self.handles.iter().map(|h| self.db.balance(h.subchain())).sum()
    }

    /// Height every subchain has processed up to. `-1` with no subchains.
    pub fn sync_height(&self) -> Height {
        self.handles
            .iter()
            .map(|h| h.status().last_processed.height)
            .min()
            .unwrap_or(-1)
    }

    pub fn unconfirmed(&self) -> Vec<Txid> {
        self.db.unconfirmed()
    }

    /// Hand a mempool transaction to every subchain. Returns how many
    /// accepted it.
    pub fn submit_transaction(&self, tx: Transaction) -> usize {
        let tx = Arc::new(tx);
        self.broadcast(|| SubchainMessage::Mempool(tx.clone()))
    }

    /// Ask every subchain to re-read the best chain.
    pub fn update(&self) -> usize {
        self.broadcast(|| SubchainMessage::Update)
    }

    fn broadcast(&self, message: impl Fn() -> SubchainMessage) -> usize {
        let mut sent = 0;
        for handle in &self.handles {
            match handle.send(message()) {
                Ok(()) => sent += 1,
                Err(e) => warn!("wallet: {e}"),
            }
        }
        sent
    }

    /// Stop every actor and wait for them to exit.
    pub async fn shutdown(&self) {
        for handle in &self.handles {
            let _ = handle.send(SubchainMessage::Shutdown);
        }
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("wallet: actor task failed: {e}");
            }
        }
        info!("wallet: stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;
    use sieve_core::mock::{make_block, pay_to, RecordingFetcher};
    use sieve_core::types::{Block, Hash256};
    use sieve_storage::StorageConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    const RECEIVE: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];
    const CHANGE: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

    fn config() -> WalletConfig {
        WalletConfig {
            tick_interval: Duration::from_millis(10),
            accounts: vec![AccountConfig {
                account: 0,
                external: vec![hex::encode(RECEIVE)],
                internal: vec![hex::encode(CHANGE)],
            }],
            ..WalletConfig::default()
        }
    }

    fn setup() -> (TempDir, Arc<Lmdb>, Arc<HeaderOracle>, Arc<BlockOracle>) {
        let dir = tempfile::tempdir().unwrap();
        let lmdb = Arc::new(Lmdb::open(dir.path(), &StorageConfig::default()).unwrap());
        let headers = Arc::new(HeaderOracle::open(lmdb.clone()));
        let blocks = Arc::new(BlockOracle::new(
            lmdb.clone(),
            Arc::new(RecordingFetcher::default()),
            32,
        ));
        (dir, lmdb, headers, blocks)
    }

    fn feed(headers: &HeaderOracle, blocks: &BlockOracle, chain: &[Block]) {
        for b in chain {
            blocks.submit(b.clone());
            headers.add_header(b.header.clone()).unwrap();
        }
    }

    async fn wait_for_height(wallet: &Wallet, height: Height) {
        for _ in 0..500 {
            if wallet.sync_height() >= height {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("wallet stuck at {}", wallet.sync_height());
    }

    #[tokio::test]
    async fn balance_spans_subchains() {
        let (_dir, lmdb, headers, blocks) = setup();
        let b0 = make_block(Hash256::ZERO, 0, vec![pay_to(&RECEIVE, 100, 0)]);
        let b1 = make_block(b0.hash(), 1, vec![pay_to(&CHANGE, 40, 1)]);
        feed(&headers, &blocks, &[b0, b1]);

        let wallet = Wallet::start(&config(), lmdb, headers, blocks).unwrap();
        assert_eq!(wallet.subchains().len(), 2);
        wait_for_height(&wallet, 1).await;
        assert_eq!(wallet.balance(), 140);
        wallet.shutdown().await;
    }

    #[tokio::test]
    async fn mempool_reaches_every_subchain() {
        let (_dir, lmdb, headers, blocks) = setup();
        let wallet = Wallet::start(&config(), lmdb, headers, blocks).unwrap();
        let tx = pay_to(&CHANGE, 1, 7);
        assert_eq!(wallet.submit_transaction(tx.clone()), 2);
        for _ in 0..100 {
            if !wallet.unconfirmed().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(wallet.unconfirmed(), vec![tx.txid()]);
        wallet.shutdown().await;
        assert_eq!(wallet.update(), 0);
    }

    #[tokio::test]
    async fn empty_wallet_reports_blank_height() {
        let (_dir, lmdb, headers, blocks) = setup();
        let wallet = Wallet::start(&WalletConfig::default(), lmdb, headers, blocks).unwrap();
        assert!(wallet.subchains().is_empty());
        assert_eq!(wallet.sync_height(), -1);
        assert_eq!(wallet.balance(), 0);
    }

    #[tokio::test]
    async fn invalid_config_rejected() {
        let (_dir, lmdb, headers, blocks) = setup();
        let cfg = WalletConfig {
            download_limit: 0,
            ..config()
        };
        assert!(matches!(
            Wallet::start(&cfg, lmdb, headers, blocks),
            Err(WalletError::Config(_))
        ));
    }
}
