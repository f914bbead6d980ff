//! # sieve-wallet
//! Per-subchain block sync and pattern matching.
//!
//! Each configured subchain gets a [`SubchainActor`] driving a [`Process`]
//! state machine: positions move from waiting to downloading to ready to
//! processing, strictly in height order, and matched outputs land in the
//! store through [`WalletDb`].

pub mod actor;
pub mod config;
pub mod db;
pub mod error;
pub mod matcher;
pub mod process;
pub mod wallet;

pub use crate::actor::{SubchainActor, SubchainHandle, SubchainMessage};
pub use crate::config::{AccountConfig, WalletConfig};
pub use crate::db::{WalletDb, WalletOutput};
pub use crate::error::WalletError;
pub use crate::process::{Process, SubchainStatus};
pub use crate::wallet::Wallet;
