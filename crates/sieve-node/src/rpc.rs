//! JSON-RPC server for the Sieve node.
//!
//! Uses jsonrpsee 0.24. Query methods expose the monitoring view (header
//! height, wallet height, download queue, balance, per-subchain pipeline
//! state); the `submit*` methods are how an external network layer feeds
//! headers, blocks and mempool transactions in as hex-encoded bincode.

use std::sync::Arc;

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};

use sieve_chain::ChainEvent;
use sieve_core::codec;
use sieve_core::types::{Block, BlockHeader, Hash256, Transaction};
use sieve_wallet::SubchainStatus;

use crate::error::NodeError;
use crate::node::{ChainStats, Node};

/// JSON representation of the monitoring snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStatsJson {
    /// Best-chain height (-1 before the first header).
    pub headers: i64,
    /// Height every subchain has processed up to.
    pub wallet_height: i64,
    /// Outstanding block downloads.
    pub download_queue: usize,
    /// Confirmed unspent value across all subchains.
    pub balance: u64,
    /// Wallet transactions seen only in the mempool.
    pub unconfirmed: usize,
}

impl From<ChainStats> for ChainStatsJson {
    fn from(stats: ChainStats) -> Self {
        Self {
            headers: stats.header_height,
            wallet_height: stats.wallet_height,
            download_queue: stats.download_queue,
            balance: stats.balance,
            unconfirmed: stats.unconfirmed,
        }
    }
}

/// JSON representation of a chain position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionJson {
    pub height: i64,
    /// Block hash as hex.
    pub hash: String,
}

/// JSON representation of one subchain's pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubchainJson {
    /// Subchain label, e.g. "0/external".
    pub subchain: String,
    pub last_processed: PositionJson,
    pub waiting: usize,
    pub downloading: usize,
    pub ready: usize,
    pub processing: usize,
}

impl From<SubchainStatus> for SubchainJson {
    fn from(status: SubchainStatus) -> Self {
        Self {
            subchain: status.subchain.to_string(),
            last_processed: PositionJson {
                height: status.last_processed.height,
                hash: hex::encode(status.last_processed.hash.as_bytes()),
            },
            waiting: status.waiting,
            downloading: status.downloading,
            ready: status.ready,
            processing: status.processing,
        }
    }
}

/// JSON representation of the outcome of `submitheader`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderResultJson {
    /// Header hash as hex.
    pub hash: String,
    /// "newtip", "reorg" or "side".
    pub event: String,
    /// Fork point for a reorg.
    pub reorg_parent: Option<PositionJson>,
}

/// JSON representation of a known header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderJson {
    pub hash: String,
    pub height: i64,
    pub prev_hash: String,
    pub timestamp: u32,
    /// False for headers on a side branch.
    pub in_best_chain: bool,
}

/// Parse a 64-character hex string into a Hash256.
pub fn parse_hash(hex_str: &str) -> Result<Hash256, ErrorObjectOwned> {
    if hex_str.len() != 64 {
        return Err(rpc_error(-1, "hash must be 64 hex characters"));
    }
    let bytes = hex::decode(hex_str).map_err(|_| rpc_error(-1, "invalid hex in hash"))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| rpc_error(-1, "hash must be 32 bytes"))?;
    Ok(Hash256(arr))
}

/// Decode a hex-encoded bincode payload.
fn decode_payload<T: bincode::Decode<()>>(hex_data: &str) -> Result<T, ErrorObjectOwned> {
    let raw = hex::decode(hex_data).map_err(|_| rpc_error(-22, "invalid hex encoding"))?;
    codec::decode(&raw).map_err(|e| rpc_error(-22, &format!("decode error: {e}")))
}

/// Create a JSON-RPC error.
fn rpc_error(code: i32, msg: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.to_string(), None::<()>)
}

fn position_json(height: i64, hash: &Hash256) -> PositionJson {
    PositionJson {
        height,
        hash: hex::encode(hash.as_bytes()),
    }
}

/// The Sieve JSON-RPC interface.
#[rpc(server)]
pub trait SieveRpc {
    /// Returns header height, wallet height, download queue depth and balance.
    #[method(name = "getchainstats")]
    async fn get_chain_stats(&self) -> Result<ChainStatsJson, ErrorObjectOwned>;

    /// Returns the best-chain tip.
    #[method(name = "getbestblock")]
    async fn get_best_block(&self) -> Result<PositionJson, ErrorObjectOwned>;

    /// Returns a known header by hash.
    #[method(name = "getheader")]
    async fn get_header(&self, hash: String) -> Result<HeaderJson, ErrorObjectOwned>;

    /// Returns the hashes of blocks waiting to be downloaded.
    #[method(name = "getdownloadqueue")]
    async fn get_download_queue(&self) -> Result<Vec<String>, ErrorObjectOwned>;

    /// Returns the pipeline state of every subchain.
    #[method(name = "getsubchains")]
    async fn get_subchains(&self) -> Result<Vec<SubchainJson>, ErrorObjectOwned>;

    /// Returns the confirmed wallet balance.
    #[method(name = "getbalance")]
    async fn get_balance(&self) -> Result<u64, ErrorObjectOwned>;

    /// Submits a block header (hex-encoded bincode).
    #[method(name = "submitheader")]
    async fn submit_header(&self, hex_data: String) -> Result<HeaderResultJson, ErrorObjectOwned>;

    /// Submits a block (hex-encoded bincode). Returns its hash.
    #[method(name = "submitblock")]
    async fn submit_block(&self, hex_data: String) -> Result<String, ErrorObjectOwned>;

    /// Submits a mempool transaction (hex-encoded bincode). Returns its txid.
    #[method(name = "submittransaction")]
    async fn submit_transaction(&self, hex_data: String) -> Result<String, ErrorObjectOwned>;
}

/// Implementation of the Sieve JSON-RPC server.
pub struct RpcServerImpl {
    node: Arc<Node>,
}

impl RpcServerImpl {
    /// Create a new RPC server implementation wrapping the given node.
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl SieveRpcServer for RpcServerImpl {
    async fn get_chain_stats(&self) -> Result<ChainStatsJson, ErrorObjectOwned> {
        Ok(self.node.chain_stats().into())
    }

    async fn get_best_block(&self) -> Result<PositionJson, ErrorObjectOwned> {
        let tip = self.node.best_block();
        Ok(position_json(tip.height, &tip.hash))
    }

    async fn get_header(&self, hash: String) -> Result<HeaderJson, ErrorObjectOwned> {
        let hash = parse_hash(&hash)?;
        let (header, position, in_best_chain) = self
            .node
            .header(&hash)
            .ok_or_else(|| rpc_error(-5, "header not found"))?;
        Ok(HeaderJson {
            hash: hex::encode(hash.as_bytes()),
            height: position.height,
            prev_hash: hex::encode(header.prev_hash.as_bytes()),
            timestamp: header.timestamp,
            in_best_chain,
        })
    }

    async fn get_download_queue(&self) -> Result<Vec<String>, ErrorObjectOwned> {
        Ok(self
            .node
            .download_queue()
            .iter()
            .map(|h| hex::encode(h.as_bytes()))
            .collect())
    }

    async fn get_subchains(&self) -> Result<Vec<SubchainJson>, ErrorObjectOwned> {
        Ok(self.node.subchains().into_iter().map(SubchainJson::from).collect())
    }

    async fn get_balance(&self) -> Result<u64, ErrorObjectOwned> {
        Ok(self.node.balance())
    }

    async fn submit_header(&self, hex_data: String) -> Result<HeaderResultJson, ErrorObjectOwned> {
        let header: BlockHeader = decode_payload(&hex_data)?;
        let hash = header.hash();
        let event = self
            .node
            .submit_header(header)
            .map_err(|e| rpc_error(-25, &e.to_string()))?;

        let (event, reorg_parent) = match event {
            Some(ChainEvent::NewTip(_)) => ("newtip", None),
            Some(ChainEvent::Reorg { parent, .. }) => {
                ("reorg", Some(position_json(parent.height, &parent.hash)))
            }
            None => ("side", None),
        };
        Ok(HeaderResultJson {
            hash: hex::encode(hash.as_bytes()),
            event: event.to_string(),
            reorg_parent,
        })
    }

    async fn submit_block(&self, hex_data: String) -> Result<String, ErrorObjectOwned> {
        let block: Block = decode_payload(&hex_data)?;
        let hash = self
            .node
            .submit_block(block)
            .map_err(|e| rpc_error(-25, &e.to_string()))?;
        Ok(hex::encode(hash.as_bytes()))
    }

    async fn submit_transaction(&self, hex_data: String) -> Result<String, ErrorObjectOwned> {
        let tx: Transaction = decode_payload(&hex_data)?;
        let (txid, delivered) = self.node.submit_transaction(tx);
        if delivered == 0 && !self.node.subchains().is_empty() {
            return Err(rpc_error(-1, "wallet is not running"));
        }
        Ok(hex::encode(txid.as_bytes()))
    }
}

/// Start the JSON-RPC server on the given address.
///
/// Returns a [`ServerHandle`] that can be used to stop the server.
pub async fn start_rpc_server(addr: &str, node: Arc<Node>) -> Result<ServerHandle, NodeError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| NodeError::Rpc(format!("RPC server error: {e}")))?;

    let rpc_impl = RpcServerImpl::new(node);
    let handle = server.start(rpc_impl.into_rpc());

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_core::types::{Position, SubchainId, SubchainKind};

    #[test]
    fn parse_hash_valid() {
        let hex_str = "aa".repeat(32);
        let hash = parse_hash(&hex_str).unwrap();
        assert_eq!(hash, Hash256([0xAA; 32]));
    }

    #[test]
    fn parse_hash_wrong_length() {
        let err = parse_hash("abcdef").unwrap_err();
        assert!(err.message().contains("64 hex characters"));
    }

    #[test]
    fn parse_hash_invalid_hex() {
        let hex_str = "zz".repeat(32);
        let err = parse_hash(&hex_str).unwrap_err();
        assert!(err.message().contains("invalid hex"));
    }

    #[test]
    fn decode_payload_round_trips_header() {
        let header = sieve_core::mock::make_block(Hash256::ZERO, 4, vec![]).header;
        let hex_data = hex::encode(codec::encode(&header).unwrap());
        let decoded: BlockHeader = decode_payload(&hex_data).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn decode_payload_rejects_bad_input() {
        let err = decode_payload::<BlockHeader>("not hex").unwrap_err();
        assert_eq!(err.code(), -22);
        let err = decode_payload::<BlockHeader>("00").unwrap_err();
        assert!(err.message().contains("decode error"));
    }

    #[test]
    fn chain_stats_json_serializes() {
        let json = serde_json::to_string(&ChainStatsJson::from(ChainStats {
            header_height: 10,
            headers: 12,
            wallet_height: 8,
            download_queue: 2,
            balance: 500,
            unconfirmed: 1,
        }))
        .unwrap();
        assert!(json.contains("\"headers\":10"));
        assert!(json.contains("\"wallet_height\":8"));
        assert!(json.contains("\"download_queue\":2"));
    }

    #[test]
    fn subchain_json_labels_subchain() {
        let mut status = SubchainStatus::new(SubchainId::new(2, SubchainKind::Internal));
        status.last_processed = Position::new(5, Hash256([1; 32]));
        status.waiting = 3;
        let json = SubchainJson::from(status);
        assert_eq!(json.subchain, "2/internal");
        assert_eq!(json.last_processed.height, 5);
        assert_eq!(json.last_processed.hash, "01".repeat(32));
        let text = serde_json::to_string(&json).unwrap();
        assert!(text.contains("\"waiting\":3"));
    }

    #[test]
    fn blank_position_serializes() {
        let json = position_json(Position::BLANK.height, &Position::BLANK.hash);
        assert_eq!(json.height, -1);
        assert_eq!(json.hash, "00".repeat(32));
    }
}
