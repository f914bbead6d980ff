//! Node error types.

use sieve_core::error::SieveError;
use sieve_storage::StorageError;
use sieve_wallet::WalletError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("wallet: {0}")]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Core(#[from] SieveError),

    /// The RPC server could not bind or start.
    #[error("rpc: {0}")]
    Rpc(String),
}
