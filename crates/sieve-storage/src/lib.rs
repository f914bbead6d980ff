//! # sieve-storage
//! Multi-table LMDB store with scoped transactions, cursor scans and a
//! deferred write queue.
//!
//! Engine errors never escape the public surface: operations log them and
//! return `false`, an empty result, or a [`StoreResult`] carrying the
//! engine's error code. Only [`Lmdb::open`] returns a `Result`, since a
//! store that cannot be opened is a fatal startup condition.

pub mod config;
pub mod error;
pub mod store;
pub mod table;
pub mod transaction;

pub use crate::config::StorageConfig;
pub use crate::error::StorageError;
pub use crate::store::{Dir, Lmdb, Mode, StoreResult};
pub use crate::table::Table;
pub use crate::transaction::Transaction;
pub use lmdb::WriteFlags;
