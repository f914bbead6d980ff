//! # sieve-node — Node composition and JSON-RPC.
//!
//! Wires the Sieve subsystems into a running node:
//! - [`node::Node`] — storage, header and block oracles, and the wallet
//! - [`rpc`] — JSON-RPC server for monitoring and for feeding headers,
//!   blocks and mempool transactions in
//! - [`config::NodeConfig`] — node configuration

pub mod config;
pub mod error;
pub mod node;
pub mod rpc;

pub use config::NodeConfig;
pub use error::NodeError;
pub use node::Node;
pub use rpc::start_rpc_server;
