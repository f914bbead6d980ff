//! Wallet error types.

use sieve_core::error::SieveError;
use thiserror::Error;

/// Errors that can occur in wallet operations.
#[derive(Error, Debug)]
pub enum WalletError {
    /// A wallet pattern could not be parsed from its configured form.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// Invalid pipeline limits or account layout.
    #[error("invalid config: {0}")]
    Config(String),

    /// A storage operation reported failure.
    #[error("storage: {0}")]
    Storage(String),

    /// The subchain actor has stopped.
    #[error("subchain {0} is not running")]
    NotRunning(String),

    #[error(transparent)]
    Core(#[from] SieveError),
}
