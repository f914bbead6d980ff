//! Core chain types: hashes, positions, blocks, transactions, wallet patterns.
//!
//! Blocks and transactions here are already validated by the collaborator
//! that hands them to the node; this crate only models what the sync
//! pipeline needs to identify, order and match them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;

use crate::error::SieveError;

/// Block height. Signed so that `-1` can mark "before genesis".
pub type Height = i64;

/// A 32-byte hash value.
///
/// Used for block header hashes (double SHA-256) and transaction IDs (BLAKE3).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

/// Block identifier.
pub type BlockHash = Hash256;

/// Transaction identifier.
pub type Txid = Hash256;

impl Hash256 {
    /// The zero hash. Treated as the null hash throughout.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a Hash256 from a slice, if it is exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, SieveError> {
        let bytes = hex::decode(s).map_err(|e| SieveError::Encoding(e.to_string()))?;
        Self::from_slice(&bytes)
            .ok_or_else(|| SieveError::Encoding(format!("expected 32 bytes, got {}", bytes.len())))
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the null (all-zero) hash.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A point on a blockchain: `(height, hash)`.
///
/// Ordering only looks at heights: `current > candidate` is the reorg test
/// used throughout the sync pipeline. Two positions at the same height are
/// equal when their hashes match and unordered otherwise.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct Position {
    pub height: Height,
    pub hash: BlockHash,
}

impl Position {
    /// The position before genesis.
    pub const BLANK: Self = Self {
        height: -1,
        hash: Hash256::ZERO,
    };

    /// Encoded length: 8-byte big-endian height followed by the 32-byte hash.
    pub const ENCODED_LEN: usize = 40;

    pub fn new(height: Height, hash: BlockHash) -> Self {
        Self { height, hash }
    }

    pub fn is_blank(&self) -> bool {
        self.height < 0
    }

    /// Fixed-width encoding used as a storage value.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..8].copy_from_slice(&self.height.to_be_bytes());
        out[8..].copy_from_slice(self.hash.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let height = Height::from_be_bytes(bytes[..8].try_into().ok()?);
        let hash = Hash256::from_slice(&bytes[8..])?;
        Some(Self { height, hash })
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.height.cmp(&other.height) {
            Ordering::Equal if self.hash == other.hash => Some(Ordering::Equal),
            Ordering::Equal => None,
            ord => Some(ord),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.height, self.hash)
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    pub txid: Txid,
    pub index: u32,
}

impl OutPoint {
    pub const ENCODED_LEN: usize = 36;

    /// The null outpoint, used for coinbase inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_null() && self.index == u32::MAX
    }

    /// Storage key form: txid followed by big-endian index.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..32].copy_from_slice(self.txid.as_bytes());
        out[32..].copy_from_slice(&self.index.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        Some(Self {
            txid: Hash256::from_slice(&bytes[..32])?,
            index: u32::from_be_bytes(bytes[32..].try_into().ok()?),
        })
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent. Null for coinbase inputs.
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
}

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Value in base units.
    pub value: u64,
    /// Locking script. Wallet patterns are matched against its bytes.
    pub script: Vec<u8>,
}

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Compute the transaction ID: BLAKE3 over a fixed little-endian layout.
    pub fn txid(&self) -> Txid {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&(self.inputs.len() as u64).to_le_bytes());
        for input in &self.inputs {
            hasher.update(input.previous_output.txid.as_bytes());
            hasher.update(&input.previous_output.index.to_le_bytes());
            hasher.update(&(input.script_sig.len() as u64).to_le_bytes());
            hasher.update(&input.script_sig);
        }
        hasher.update(&(self.outputs.len() as u64).to_le_bytes());
        for output in &self.outputs {
            hasher.update(&output.value.to_le_bytes());
            hasher.update(&(output.script.len() as u64).to_le_bytes());
            hasher.update(&output.script);
        }
        hasher.update(&self.lock_time.to_le_bytes());
        Hash256(hasher.finalize().into())
    }

    /// A coinbase has a single input spending the null outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }
}

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: BlockHash,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    const HASH_SIZE: usize = 4 * 4 + 2 * 32;

    /// Double SHA-256 over version || prev_hash || merkle_root || timestamp ||
    /// bits || nonce, integers little-endian.
    pub fn hash(&self) -> BlockHash {
        let mut data = Vec::with_capacity(Self::HASH_SIZE);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(self.merkle_root.as_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.bits.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        let first = Sha256::digest(&data);
        let second = Sha256::digest(first);
        Hash256(second.into())
    }
}

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }
}

/// Which derivation branch of an account a subchain tracks.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub enum SubchainKind {
    /// Receive addresses.
    External,
    /// Change addresses.
    Internal,
}

/// Identifies one subchain: an account plus a derivation branch.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct SubchainId {
    pub account: u32,
    pub kind: SubchainKind,
}

impl SubchainId {
    pub const ENCODED_LEN: usize = 5;

    pub fn new(account: u32, kind: SubchainKind) -> Self {
        Self { account, kind }
    }

    /// Storage key prefix for this subchain.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..4].copy_from_slice(&self.account.to_be_bytes());
        out[4] = match self.kind {
            SubchainKind::External => 0,
            SubchainKind::Internal => 1,
        };
        out
    }
}

impl fmt::Display for SubchainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            SubchainKind::External => "external",
            SubchainKind::Internal => "internal",
        };
        write!(f, "{}/{}", self.account, kind)
    }
}

/// A wallet-owned key pattern: the element a matching output script embeds
/// (for example a public key hash) and the derivation index that produced it.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct Pattern {
    pub index: u32,
    pub element: Vec<u8>,
}

impl Pattern {
    pub fn new(index: u32, element: impl Into<Vec<u8>>) -> Self {
        Self {
            index,
            element: element.into(),
        }
    }

    /// True if `script` embeds this pattern's element.
    pub fn matches(&self, script: &[u8]) -> bool {
        let needle = self.element.as_slice();
        !needle.is_empty()
            && script.len() >= needle.len()
            && script.windows(needle.len()).any(|w| w == needle)
    }
}
