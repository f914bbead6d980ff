//! # sieve-chain
//! Block supply and best-chain tracking for the subchain sync pipeline.
//!
//! - [`Mem`]: bounded FIFO cache of block handles
//! - [`BlockOracle`]: block handles from cache, disk, or a download
//! - [`HeaderOracle`]: the best chain and its reorg notifications

pub mod block_oracle;
pub mod header_oracle;
pub mod mem;

pub use crate::block_oracle::BlockOracle;
pub use crate::header_oracle::{ChainEvent, HeaderOracle};
pub use crate::mem::Mem;
