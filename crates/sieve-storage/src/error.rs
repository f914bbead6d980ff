//! Storage error types.
use thiserror::Error;

use sieve_core::error::SieveError;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("lmdb: {0}")] Lmdb(#[from] lmdb::Error),
    #[error("io: {0}")] Io(#[from] std::io::Error),
    #[error("invalid config: {0}")] Config(String),
}

impl From<StorageError> for SieveError {
    fn from(e: StorageError) -> Self {
        SieveError::Storage(e.to_string())
    }
}
