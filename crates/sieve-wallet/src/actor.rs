//! Tokio task driving one subchain's [`Process`].
//!
//! The actor owns its process exclusively. Inputs arrive as mailbox
//! messages, header oracle events, block oracle notifications or timer
//! ticks; each one is handled and followed by a [`Process::work`] step.
//! Matching jobs run on the blocking pool and report back through the
//! mailbox.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use sieve_chain::ChainEvent;
use sieve_core::types::{BlockHash, Position, SubchainId, Transaction};

use crate::error::WalletError;
use crate::matcher::BlockScan;
use crate::process::{Process, SubchainStatus};

/// Inputs to a subchain actor.
#[derive(Debug)]
pub enum SubchainMessage {
    /// A download resolved.
    Block(BlockHash),
    /// An unconfirmed transaction to match.
    Mempool(Arc<Transaction>),
    /// Re-read the best chain.
    Update,
    /// Drop everything above the given position.
    Reorg(Position),
    /// A matching job finished.
    Processed {
        id: u64,
        position: Position,
        scan: BlockScan,
    },
    Shutdown,
}

/// Cloneable sender side of a running actor.
#[derive(Clone)]
pub struct SubchainHandle {
    subchain: SubchainId,
    tx: mpsc::UnboundedSender<SubchainMessage>,
    status: Arc<RwLock<SubchainStatus>>,
}

impl SubchainHandle {
    pub fn subchain(&self) -> SubchainId {
        self.subchain
    }

    /// Last status published by the actor.
    pub fn status(&self) -> SubchainStatus {
        self.status.read().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn send(&self, message: SubchainMessage) -> Result<(), WalletError> {
        self.tx
            .send(message)
            .map_err(|_| WalletError::NotRunning(self.subchain.to_string()))
    }
}

pub struct SubchainActor {
    process: Process,
    mailbox: mpsc::UnboundedReceiver<SubchainMessage>,
    /// Completion path for jobs. Weak so dropping every handle stops the
    /// actor once in-flight jobs are done.
    completions: mpsc::WeakUnboundedSender<SubchainMessage>,
    chain_events: broadcast::Receiver<ChainEvent>,
    block_events: broadcast::Receiver<BlockHash>,
    status: Arc<RwLock<SubchainStatus>>,
    tick: Duration,
}

impl SubchainActor {
    pub fn new(
        process: Process,
        chain_events: broadcast::Receiver<ChainEvent>,
        block_events: broadcast::Receiver<BlockHash>,
        tick: Duration,
    ) -> (Self, SubchainHandle) {
        let (tx, mailbox) = mpsc::unbounded_channel();
        let subchain = process.subchain();
        let status = Arc::new(RwLock::new(process.status()));
        let handle = SubchainHandle {
            subchain,
            tx: tx.clone(),
            status: status.clone(),
        };
        let actor = Self {
            process,
            mailbox,
            completions: tx.downgrade(),
            chain_events,
            block_events,
            status,
            tick,
        };
        (actor, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let subchain = self.process.subchain();
        self.process.do_startup();
        self.work();

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = self.mailbox.recv() => match message {
                    Some(SubchainMessage::Shutdown) | None => break,
                    Some(message) => self.handle(message),
                },
                event = self.chain_events.recv() => match event {
                    Ok(ChainEvent::NewTip(tip)) => {
                        debug!(%subchain, height = tip.height, "actor: new tip");
                        self.process.process_update();
                    }
                    Ok(ChainEvent::Reorg { parent, tip }) => {
                        debug!(%subchain, parent = parent.height, tip = tip.height, "actor: reorg");
                        self.process.process_reorg(parent);
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(%subchain, skipped = n, "actor: lagged behind chain events");
                        self.process.process_update();
                    }
                    Err(RecvError::Closed) => {
                        info!(%subchain, "actor: header oracle gone");
                        break;
                    }
                },
                hash = self.block_events.recv() => match hash {
                    Ok(hash) => {
                        self.process.process_block(&hash);
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(%subchain, skipped = n, "actor: lagged behind block events");
                        self.process.check_cache();
                    }
                    Err(RecvError::Closed) => {
                        info!(%subchain, "actor: block oracle gone");
                        break;
                    }
                },
                _ = ticker.tick() => {}
            }
            self.work();
        }

        *self.status.write() = self.process.status();
        info!(%subchain, height = self.process.last_processed().height, "actor: stopped");
    }

    fn handle(&mut self, message: SubchainMessage) {
        match message {
            SubchainMessage::Block(hash) => {
                self.process.process_block(&hash);
            }
            SubchainMessage::Mempool(tx) => {
                self.process.process_mempool(&tx);
            }
            SubchainMessage::Update => self.process.process_update(),
            SubchainMessage::Reorg(parent) => self.process.process_reorg(parent),
            SubchainMessage::Processed { id, position, scan } => {
                self.process.finish_process(id, position, scan);
            }
            SubchainMessage::Shutdown => {}
        }
    }

    fn work(&mut self) {
        for job in self.process.work() {
            let Some(completions) = self.completions.upgrade() else {
                break;
            };
            tokio::task::spawn_blocking(move || {
                let scan = job.run();
                let _ = completions.send(SubchainMessage::Processed {
                    id: job.id,
                    position: job.position,
                    scan,
                });
            });
        }
        *self.status.write() = self.process.status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletConfig;
    use crate::db::WalletDb;
    use sieve_chain::{BlockOracle, HeaderOracle};
    use sieve_core::mock::{make_block, pay_to, RecordingFetcher};
    use sieve_core::types::{Block, Hash256, Pattern, SubchainKind};
    use sieve_storage::{Lmdb, StorageConfig};
    use tempfile::TempDir;

    const ELEMENT: [u8; 20] = [0x5A; 20];
    const SUBCHAIN: SubchainId = SubchainId {
        account: 1,
        kind: SubchainKind::Internal,
    };

    struct Setup {
        _dir: TempDir,
        headers: Arc<HeaderOracle>,
        blocks: Arc<BlockOracle>,
        db: Arc<WalletDb>,
    }

    fn setup() -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let lmdb = Arc::new(Lmdb::open(dir.path(), &StorageConfig::default()).unwrap());
        let fetcher = Arc::new(RecordingFetcher::default());
        Setup {
            _dir: dir,
            headers: Arc::new(HeaderOracle::open(lmdb.clone())),
            blocks: Arc::new(BlockOracle::new(lmdb.clone(), fetcher, 16)),
            db: Arc::new(WalletDb::new(lmdb)),
        }
    }

    fn start(s: &Setup) -> (JoinHandle<()>, SubchainHandle) {
        let process = Process::new(
            SUBCHAIN,
            vec![Pattern::new(3, ELEMENT.to_vec())],
            &WalletConfig::default(),
            s.headers.clone(),
            s.blocks.clone(),
            s.db.clone(),
        );
        let (actor, handle) = SubchainActor::new(
            process,
            s.headers.subscribe(),
            s.blocks.subscribe(),
            Duration::from_millis(10),
        );
        (actor.spawn(), handle)
    }

    fn chain(len: u32, from: Hash256, salt: u32) -> Vec<Block> {
        let mut prev = from;
        (0..len)
            .map(|i| {
                let block = make_block(prev, salt + i, vec![pay_to(&ELEMENT, 5, salt + i)]);
                prev = block.hash();
                block
            })
            .collect()
    }

    async fn wait_for(handle: &SubchainHandle, pred: impl Fn(&SubchainStatus) -> bool) -> SubchainStatus {
        for _ in 0..500 {
            let status = handle.status();
            if pred(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out; last status {:?}", handle.status());
    }

    #[tokio::test]
    async fn syncs_blocks_as_they_arrive() {
        let s = setup();
        let blocks = chain(4, Hash256::ZERO, 0);
        for b in &blocks {
            s.headers.add_header(b.header.clone()).unwrap();
        }
        let (task, handle) = start(&s);

        for b in &blocks {
            s.blocks.submit(b.clone());
        }
        let status = wait_for(&handle, |st| st.last_processed.height == 3).await;
        assert!(status.is_idle());
        assert_eq!(s.db.balance(SUBCHAIN), 20);

        handle.send(SubchainMessage::Shutdown).unwrap();
        task.await.unwrap();
        assert!(!handle.is_running());
        assert!(handle.send(SubchainMessage::Update).is_err());
    }

    #[tokio::test]
    async fn follows_header_reorg() {
        let s = setup();
        let blocks = chain(3, Hash256::ZERO, 0);
        for b in &blocks {
            s.headers.add_header(b.header.clone()).unwrap();
            s.blocks.submit(b.clone());
        }
        let (task, handle) = start(&s);
        wait_for(&handle, |st| st.last_processed.height == 2).await;

        let fork = chain(3, blocks[0].hash(), 100);
        for b in &fork {
            s.blocks.submit(b.clone());
            s.headers.add_header(b.header.clone()).unwrap();
        }
        let status = wait_for(&handle, |st| st.last_processed.hash == fork[2].hash()).await;
        assert_eq!(status.last_processed.height, 3);
        assert_eq!(s.db.balance(SUBCHAIN), 20);

        handle.send(SubchainMessage::Shutdown).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn mempool_message_records_match() {
        let s = setup();
        let (task, handle) = start(&s);
        let tx = pay_to(&ELEMENT, 9, 42);
        handle.send(SubchainMessage::Mempool(Arc::new(tx.clone()))).unwrap();
        for _ in 0..100 {
            if s.db.is_unconfirmed(&tx.txid()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(s.db.is_unconfirmed(&tx.txid()));
        handle.send(SubchainMessage::Shutdown).unwrap();
        task.await.unwrap();
    }
}
