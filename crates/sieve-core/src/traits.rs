//! Trait interfaces between the sync pipeline crates.
//!
//! - [`HeaderSource`]: best-chain queries (sieve-chain's `HeaderOracle` implements)
//! - [`BlockSource`]: block handles by hash (sieve-chain's `BlockOracle` implements)
//! - [`BlockFetcher`]: the external download collaborator

use crate::future::BlockFuture;
use crate::types::{BlockHash, Height, Position};

/// Read-only view of the best chain.
pub trait HeaderSource: Send + Sync {
    /// The current best-chain tip. `Position::BLANK` when no headers are known.
    fn best_chain(&self) -> Position;

    /// Hash of the best-chain block at `height`.
    fn best_hash(&self, height: Height) -> Option<BlockHash>;

    /// Whether `position` lies on the best chain.
    ///
    /// Default implementation delegates to [`best_hash`](Self::best_hash).
    fn is_in_best_chain(&self, position: &Position) -> bool {
        position.is_blank() || self.best_hash(position.height) == Some(position.hash)
    }

    /// Deepest best-chain ancestor of `position`, or `Position::BLANK` if it
    /// shares no known history with the best chain.
    fn common_parent(&self, position: &Position) -> Position;
}

/// Hands out block handles without blocking.
pub trait BlockSource: Send + Sync {
    /// A handle that resolves to the block with `hash`. Never blocks.
    fn load(&self, hash: &BlockHash) -> BlockFuture;
}

/// Downloads blocks on request.
///
/// `request` only schedules the fetch; the implementor reports the result
/// back to the block oracle's `submit` or `fail`.
pub trait BlockFetcher: Send + Sync {
    fn request(&self, hash: &BlockHash);
}
