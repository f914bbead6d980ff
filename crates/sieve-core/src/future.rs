//! At-most-once block handles shared between the block oracle and actors.
//!
//! A [`BlockPromise`] is the producer side held by whoever is downloading the
//! block; every consumer holds a cloneable [`BlockFuture`]. Consumers can ask
//! whether the handle has resolved without blocking ([`BlockFuture::poll`])
//! or await it. A promise dropped without resolving counts as a failure so
//! no consumer waits forever on an abandoned download.

use std::sync::Arc;

use tokio::sync::watch;

use crate::types::Block;

/// The resolved state of a block handle.
#[derive(Clone, Debug)]
pub enum BlockOutcome {
    Ready(Arc<Block>),
    Failed(String),
}

impl BlockOutcome {
    pub fn block(&self) -> Option<&Arc<Block>> {
        match self {
            Self::Ready(block) => Some(block),
            Self::Failed(_) => None,
        }
    }
}

/// Producer side of a block handle.
#[derive(Debug)]
pub struct BlockPromise {
    tx: watch::Sender<Option<BlockOutcome>>,
}

/// Consumer side of a block handle.
#[derive(Clone, Debug)]
pub struct BlockFuture {
    rx: watch::Receiver<Option<BlockOutcome>>,
}

/// Create a linked promise/future pair.
pub fn block_channel() -> (BlockPromise, BlockFuture) {
    let (tx, rx) = watch::channel(None);
    (BlockPromise { tx }, BlockFuture { rx })
}

impl BlockPromise {
    pub fn fulfil(self, block: Arc<Block>) {
        self.tx.send_replace(Some(BlockOutcome::Ready(block)));
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.tx.send_replace(Some(BlockOutcome::Failed(reason.into())));
    }

    /// A fresh consumer handle for this promise.
    pub fn future(&self) -> BlockFuture {
        BlockFuture {
            rx: self.tx.subscribe(),
        }
    }
}

impl BlockFuture {
    /// An already-resolved handle.
    pub fn ready(block: Arc<Block>) -> Self {
        let (tx, rx) = watch::channel(Some(BlockOutcome::Ready(block)));
        drop(tx);
        Self { rx }
    }

    /// An already-failed handle.
    pub fn failed(reason: impl Into<String>) -> Self {
        let (tx, rx) = watch::channel(Some(BlockOutcome::Failed(reason.into())));
        drop(tx);
        Self { rx }
    }

    /// Non-blocking check. `None` while the download is outstanding.
    pub fn poll(&self) -> Option<BlockOutcome> {
        if let Some(outcome) = self.rx.borrow().clone() {
            return Some(outcome);
        }
        match self.rx.has_changed() {
            Err(_) => Some(BlockOutcome::Failed("download abandoned".into())),
            Ok(_) => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.poll().is_some()
    }

    /// The block, if the handle resolved successfully.
    pub fn block(&self) -> Option<Arc<Block>> {
        self.poll().and_then(|o| o.block().cloned())
    }

    /// Wait for the handle to resolve.
    pub async fn wait(&self) -> BlockOutcome {
        let mut rx = self.rx.clone();
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return rx
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| BlockOutcome::Failed("download abandoned".into()));
            }
        }
    }

    /// True if both handles observe the same producer.
    pub fn same_channel(&self, other: &Self) -> bool {
        self.rx.same_channel(&other.rx)
    }
}
