//! Error types for the Sieve node.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("unknown parent: {0}")] UnknownParent(String),
    #[error("duplicate header: {0}")] DuplicateHeader(String),
    #[error("genesis already set")] GenesisExists,
}

#[derive(Error, Debug)]
pub enum SieveError {
    #[error(transparent)] Chain(#[from] ChainError),
    #[error("encoding: {0}")] Encoding(String),
    #[error("storage: {0}")] Storage(String),
}
