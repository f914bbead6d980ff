//! Best-chain tracking.
//!
//! Headers arrive from the validation collaborator already checked; the
//! oracle only links them to a known parent, keeps the highest chain as the
//! best chain (first seen wins ties), and tells subscribers whether the tip
//! moved forward or switched branches.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use sieve_core::codec;
use sieve_core::constants::EVENT_CHANNEL_CAPACITY;
use sieve_core::error::{ChainError, SieveError};
use sieve_core::traits::HeaderSource;
use sieve_core::types::{BlockHash, BlockHeader, Hash256, Height, Position};
use sieve_storage::store::index_key;
use sieve_storage::{Dir, Lmdb, Table, WriteFlags};

/// Change to the best chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// The best chain grew by one block on top of the previous tip.
    NewTip(Position),
    /// The best chain switched branches. Every best-chain position above
    /// `parent` was replaced.
    Reorg { parent: Position, tip: Position },
}

#[derive(Default)]
struct Inner {
    headers: HashMap<BlockHash, (BlockHeader, Height)>,
    best: Vec<BlockHash>,
}

impl Inner {
    fn tip(&self) -> Position {
        match self.best.last() {
            Some(hash) => Position::new(self.best.len() as Height - 1, *hash),
            None => Position::BLANK,
        }
    }

    fn best_hash(&self, height: Height) -> Option<BlockHash> {
        usize::try_from(height).ok().and_then(|h| self.best.get(h)).copied()
    }

    fn on_best(&self, position: &Position) -> bool {
        self.best_hash(position.height) == Some(position.hash)
    }

    fn common_parent(&self, position: &Position) -> Position {
        let mut cursor = *position;
        loop {
            if cursor.is_blank() || self.on_best(&cursor) {
                return cursor;
            }
            match self.headers.get(&cursor.hash) {
                Some((header, height)) if *height == cursor.height => {
                    cursor = match self.headers.get(&header.prev_hash) {
                        Some((_, parent_height)) => Position::new(*parent_height, header.prev_hash),
                        None => Position::BLANK,
                    };
                }
                _ => return Position::BLANK,
            }
        }
    }

    /// Hashes from just above the fork point up to and including `tip`,
    /// lowest first.
    fn branch_to(&self, tip: &Position) -> (Position, Vec<BlockHash>) {
        let parent = self.common_parent(tip);
        let mut branch = Vec::with_capacity((tip.height - parent.height).max(0) as usize);
        let mut hash = tip.hash;
        while let Some((header, height)) = self.headers.get(&hash) {
            if *height <= parent.height {
                break;
            }
            branch.push(hash);
            hash = header.prev_hash;
        }
        branch.reverse();
        (parent, branch)
    }
}

pub struct HeaderOracle {
    inner: RwLock<Inner>,
    db: Arc<Lmdb>,
    events: broadcast::Sender<ChainEvent>,
}

impl HeaderOracle {
    /// Open the oracle, reloading headers and the best chain from `db`.
    pub fn open(db: Arc<Lmdb>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Self::reload(&db);
        if !inner.best.is_empty() {
            info!(
                headers = inner.headers.len(),
                height = inner.best.len() - 1,
                "header oracle: loaded best chain"
            );
        }
        Self {
            inner: RwLock::new(inner),
            db,
            events,
        }
    }

    fn reload(db: &Lmdb) -> Inner {
        let mut inner = Inner::default();
        db.read(
            Table::BlockHeaders,
            |key, value| {
                match (Hash256::from_slice(key), codec::decode::<(BlockHeader, Height)>(value)) {
                    (Some(hash), Ok(entry)) => {
                        inner.headers.insert(hash, entry);
                    }
                    _ => warn!("header oracle: skipping undecodable header"),
                }
                true
            },
            Dir::Forward,
        );
        db.read(
            Table::BestChain,
            |key, value| {
                let (Some(height), Some(hash)) = (index_key(key), Hash256::from_slice(value)) else {
                    warn!("header oracle: skipping malformed best chain entry");
                    return false;
                };
                if height != inner.best.len() {
                    warn!(height, expected = inner.best.len(), "header oracle: gap in best chain");
                    return false;
                }
                inner.best.push(hash);
                true
            },
            Dir::Forward,
        );
        inner
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    pub fn header(&self, hash: &BlockHash) -> Option<(BlockHeader, Height)> {
        self.inner.read().headers.get(hash).cloned()
    }

    pub fn header_count(&self) -> usize {
        self.inner.read().headers.len()
    }

    /// Best-chain height, `-1` when empty.
    pub fn height(&self) -> Height {
        self.inner.read().tip().height
    }

    /// True if moving from `current` to `candidate` means dropping work done
    /// at or above `candidate`'s height.
    pub fn is_reorg(current: &Position, candidate: &Position) -> bool {
        current > candidate || (current.height == candidate.height && current != candidate)
    }

    /// Link `header` into the header tree and update the best chain.
    ///
    /// Returns the resulting chain event, or `None` when the header only
    /// extends a side branch.
    pub fn add_header(&self, header: BlockHeader) -> Result<Option<ChainEvent>, SieveError> {
        let hash = header.hash();
        let mut inner = self.inner.write();
        if inner.headers.contains_key(&hash) {
            return Err(ChainError::DuplicateHeader(hash.to_string()).into());
        }
        let height = if header.prev_hash.is_null() {
            if !inner.headers.is_empty() {
                return Err(ChainError::GenesisExists.into());
            }
            0
        } else {
            match inner.headers.get(&header.prev_hash) {
                Some((_, parent)) => parent + 1,
                None => return Err(ChainError::UnknownParent(header.prev_hash.to_string()).into()),
            }
        };

        let old_tip = inner.tip();
        let position = Position::new(height, hash);
        let extends_tip = old_tip.is_blank() || header.prev_hash == old_tip.hash;
        inner.headers.insert(hash, (header.clone(), height));

        let (event, branch) = if height <= old_tip.height {
            (None, None)
        } else if extends_tip {
            (Some(ChainEvent::NewTip(position)), None)
        } else {
            let (parent, branch) = inner.branch_to(&position);
            (Some(ChainEvent::Reorg { parent, tip: position }), Some(branch))
        };

        if let Err(e) = self.persist(&header, height, old_tip.height, event.as_ref(), branch.as_deref()) {
            inner.headers.remove(&hash);
            return Err(e);
        }

        match (&event, branch) {
            (Some(ChainEvent::Reorg { parent, .. }), Some(branch)) => {
                inner.best.truncate((parent.height + 1) as usize);
                inner.best.extend(branch);
                info!(%hash, height, parent = parent.height, "header oracle: reorg");
            }
            (Some(_), _) => {
                inner.best.push(hash);
                debug!(%hash, height, "header oracle: new tip");
            }
            (None, _) => debug!(%hash, height, "header oracle: side branch header"),
        }

        if let Some(event) = &event {
            let _ = self.events.send(event.clone());
        }
        Ok(event)
    }

    fn persist(
        &self,
        header: &BlockHeader,
        height: Height,
        old_height: Height,
        event: Option<&ChainEvent>,
        branch: Option<&[BlockHash]>,
    ) -> Result<(), SieveError> {
        let hash = header.hash();
        let value = codec::encode(&(header.clone(), height))?;
        let Some(mut txn) = self.db.transaction_rw(None) else {
            return Err(SieveError::Storage("cannot begin header transaction".into()));
        };
        let mut ok = self
            .db
            .store(Table::BlockHeaders, hash.as_bytes(), &value, Some(&mut txn), WriteFlags::empty())
            .success;

        match (event, branch) {
            (Some(ChainEvent::NewTip(_)), _) => {
                ok &= self
                    .db
                    .store_index(Table::BestChain, height as usize, hash.as_bytes(), Some(&mut txn), WriteFlags::empty())
                    .success;
            }
            (Some(ChainEvent::Reorg { parent, .. }), Some(branch)) => {
                for stale in (parent.height + 1)..=old_height {
                    ok &= self.db.delete_index(Table::BestChain, stale as usize, Some(&mut txn));
                }
                for (offset, hash) in branch.iter().enumerate() {
                    let h = (parent.height + 1) as usize + offset;
                    ok &= self
                        .db
                        .store_index(Table::BestChain, h, hash.as_bytes(), Some(&mut txn), WriteFlags::empty())
                        .success;
                }
            }
            _ => {}
        }

        if ok && txn.finalize(Some(true)) {
            Ok(())
        } else {
            txn.finalize(Some(false));
            Err(SieveError::Storage(format!("failed to persist header {hash}")))
        }
    }

    /// Best-chain positions from `from` up to the tip.
    pub fn best_range(&self, from: Height) -> Vec<Position> {
        let inner = self.inner.read();
        let start = from.max(0) as usize;
        inner
            .best
            .iter()
            .enumerate()
            .skip(start)
            .map(|(h, hash)| Position::new(h as Height, *hash))
            .collect()
    }
}

impl HeaderSource for HeaderOracle {
    fn best_chain(&self) -> Position {
        self.inner.read().tip()
    }

    fn best_hash(&self, height: Height) -> Option<BlockHash> {
        self.inner.read().best_hash(height)
    }

    fn common_parent(&self, position: &Position) -> Position {
        self.inner.read().common_parent(position)
    }
}
