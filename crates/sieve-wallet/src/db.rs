//! Persisted wallet state.
//!
//! Layout:
//! - `SubchainPosition`: subchain id -> last processed position
//! - `WalletOutputs`: outpoint -> [`WalletOutput`]
//! - `OutputsByHeight` / `SpentByHeight`: subchain id ++ height -> outpoint,
//!   duplicates allowed, so a reorg can find everything above its parent
//! - `Unconfirmed`: txid -> mempool transaction

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use sieve_core::codec;
use sieve_core::types::{Height, OutPoint, Position, SubchainId, Transaction, Txid};
use sieve_storage::{Dir, Lmdb, Mode, Table, Transaction as DbTransaction, WriteFlags};

use crate::error::WalletError;
use crate::matcher::BlockScan;

/// A wallet-owned output.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct WalletOutput {
    pub owner: SubchainId,
    pub value: u64,
    /// Height of the block that created it.
    pub height: Height,
    /// Derivation index of the pattern it paid to.
    pub index: u32,
    /// Height of the block that spent it, if any.
    pub spent: Option<Height>,
}

/// What applying one block changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub received: usize,
    pub spent: usize,
    /// Transactions that touched the subchain.
    pub txids: Vec<Txid>,
}

pub(crate) fn height_key(subchain: SubchainId, height: Height) -> [u8; SubchainId::ENCODED_LEN + 8] {
    let mut key = [0u8; SubchainId::ENCODED_LEN + 8];
    key[..SubchainId::ENCODED_LEN].copy_from_slice(&subchain.to_bytes());
    key[SubchainId::ENCODED_LEN..].copy_from_slice(&(height.max(0) as u64).to_be_bytes());
    key
}

pub struct WalletDb {
    db: Arc<Lmdb>,
}

impl WalletDb {
    pub fn new(db: Arc<Lmdb>) -> Self {
        Self { db }
    }

    pub fn last_processed(&self, subchain: SubchainId) -> Option<Position> {
        let mut position = None;
        self.db.load(
            Table::SubchainPosition,
            &subchain.to_bytes(),
            |v| position = Position::from_bytes(v),
            Mode::One,
        );
        position
    }

    pub fn output(&self, outpoint: &OutPoint) -> Option<WalletOutput> {
        let txn = self.db.transaction_ro()?;
        self.output_in(&txn, outpoint).ok().flatten()
    }

    fn output_in(
        &self,
        txn: &DbTransaction<'_>,
        outpoint: &OutPoint,
    ) -> Result<Option<WalletOutput>, WalletError> {
        let mut bytes = None;
        if !self.db.load_in(
            txn,
            Table::WalletOutputs,
            &outpoint.to_bytes(),
            |v| bytes = Some(v.to_vec()),
            Mode::One,
        ) {
            return Ok(None);
        }
        match bytes {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// True if `outpoint` is an unspent output of `subchain`.
    pub fn is_owned_unspent(&self, outpoint: &OutPoint, subchain: SubchainId) -> bool {
        matches!(self.output(outpoint), Some(o) if o.owner == subchain && o.spent.is_none())
    }

    fn put(
        &self,
        txn: &mut DbTransaction<'_>,
        table: Table,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), WalletError> {
        let result = self.db.store(table, key, value, Some(txn), WriteFlags::empty());
        if result.success {
            Ok(())
        } else {
            Err(WalletError::Storage(format!(
                "{} write failed with code {}",
                table.name(),
                result.code
            )))
        }
    }

    fn commit(mut txn: DbTransaction<'_>) -> Result<(), WalletError> {
        if txn.finalize(Some(true)) {
            Ok(())
        } else {
            Err(WalletError::Storage("commit failed".into()))
        }
    }

    /// Record a block's matches for `subchain` and advance its marker to
    /// `position`, atomically.
    pub fn apply_block(
        &self,
        subchain: SubchainId,
        position: Position,
        scan: &BlockScan,
    ) -> Result<Applied, WalletError> {
        let Some(mut txn) = self.db.transaction_rw(None) else {
            return Err(WalletError::Storage("cannot begin write transaction".into()));
        };
        let key = height_key(subchain, position.height);
        let mut applied = Applied::default();

        for received in &scan.received {
            let output = WalletOutput {
                owner: subchain,
                value: received.value,
                height: position.height,
                index: received.index,
                spent: None,
            };
            let outpoint = received.outpoint.to_bytes();
            self.put(&mut txn, Table::WalletOutputs, &outpoint, &codec::encode(&output)?)?;
            self.put(&mut txn, Table::OutputsByHeight, &key, &outpoint)?;
            applied.received += 1;
            applied.txids.push(received.txid);
        }

        for spend in &scan.spends {
            let Some(mut output) = self.output_in(&txn, &spend.outpoint)? else {
                continue;
            };
            if output.owner != subchain || output.spent.is_some() {
                continue;
            }
            output.spent = Some(position.height);
            let outpoint = spend.outpoint.to_bytes();
            self.put(&mut txn, Table::WalletOutputs, &outpoint, &codec::encode(&output)?)?;
            self.put(&mut txn, Table::SpentByHeight, &key, &outpoint)?;
            applied.spent += 1;
            applied.txids.push(spend.txid);
        }

        applied.txids.sort();
        applied.txids.dedup();
        for txid in &applied.txids {
            // Absent unless the transaction was first seen in the mempool.
            self.db.delete(Table::Unconfirmed, txid.as_bytes(), Some(&mut txn));
        }

        self.put(&mut txn, Table::SubchainPosition, &subchain.to_bytes(), &position.to_bytes())?;
        Self::commit(txn)?;
        if !applied.txids.is_empty() {
            debug!(%subchain, height = position.height, received = applied.received, spent = applied.spent, "wallet: block matched");
        }
        Ok(applied)
    }

    /// Index keys of `table` for `subchain` above `height`, with the
    /// outpoints stored under them.
    fn entries_above(
        &self,
        txn: &DbTransaction<'_>,
        table: Table,
        subchain: SubchainId,
        height: Height,
    ) -> (BTreeSet<Vec<u8>>, Vec<OutPoint>) {
        let prefix = subchain.to_bytes();
        let from = height_key(subchain, height + 1);
        let mut keys = BTreeSet::new();
        let mut outpoints = Vec::new();
        self.db.read_in(
            txn,
            table,
            |key, value| {
                if key.len() < prefix.len() || key[..prefix.len()] > prefix[..] {
                    return false;
                }
                if key[..prefix.len()] == prefix[..] && key >= &from[..] {
                    keys.insert(key.to_vec());
                    if let Some(outpoint) = OutPoint::from_bytes(value) {
                        outpoints.push(outpoint);
                    }
                }
                true
            },
            Dir::Forward,
        );
        (keys, outpoints)
    }

    /// Undo every match of `subchain` above `parent` and move its marker
    /// back to `parent`, atomically. Returns how many outputs were removed.
    pub fn rollback(&self, subchain: SubchainId, parent: Position) -> Result<usize, WalletError> {
        let Some(mut txn) = self.db.transaction_rw(None) else {
            return Err(WalletError::Storage("cannot begin write transaction".into()));
        };

        let (spent_keys, unspent) = self.entries_above(&txn, Table::SpentByHeight, subchain, parent.height);
        for outpoint in &unspent {
            if let Some(mut output) = self.output_in(&txn, outpoint)? {
                output.spent = None;
                self.put(&mut txn, Table::WalletOutputs, &outpoint.to_bytes(), &codec::encode(&output)?)?;
            }
        }
        for key in &spent_keys {
            self.db.delete(Table::SpentByHeight, key, Some(&mut txn));
        }

        let (received_keys, removed) =
            self.entries_above(&txn, Table::OutputsByHeight, subchain, parent.height);
        for outpoint in &removed {
            self.db.delete(Table::WalletOutputs, &outpoint.to_bytes(), Some(&mut txn));
        }
        for key in &received_keys {
            self.db.delete(Table::OutputsByHeight, key, Some(&mut txn));
        }

        if parent.is_blank() {
            self.db.delete(Table::SubchainPosition, &subchain.to_bytes(), Some(&mut txn));
        } else {
            self.put(&mut txn, Table::SubchainPosition, &subchain.to_bytes(), &parent.to_bytes())?;
        }
        Self::commit(txn)?;
        info!(%subchain, parent = parent.height, removed = removed.len(), restored = unspent.len(), "wallet: rolled back matches");
        Ok(removed.len())
    }

    pub fn outputs(&self, subchain: SubchainId) -> Vec<(OutPoint, WalletOutput)> {
        let mut out = Vec::new();
        self.db.read(
            Table::WalletOutputs,
            |key, value| {
                if let (Some(outpoint), Ok(output)) =
                    (OutPoint::from_bytes(key), codec::decode::<WalletOutput>(value))
                {
                    if output.owner == subchain {
                        out.push((outpoint, output));
                    }
                }
                true
            },
            Dir::Forward,
        );
        out
    }

    /// Sum of unspent confirmed outputs.
    pub fn balance(&self, subchain: SubchainId) -> u64 {
        self.outputs(subchain)
            .iter()
            .filter(|(_, o)| o.spent.is_none())
            .map(|(_, o)| o.value)
            .sum()
    }

    pub fn record_unconfirmed(&self, tx: &Transaction) -> Result<(), WalletError> {
        let result = self.db.store(
            Table::Unconfirmed,
            tx.txid().as_bytes(),
            &codec::encode(tx)?,
            None,
            WriteFlags::empty(),
        );
        if result.success {
            Ok(())
        } else {
            Err(WalletError::Storage(format!("unconfirmed write failed with code {}", result.code)))
        }
    }

    pub fn is_unconfirmed(&self, txid: &Txid) -> bool {
        self.db.exists(Table::Unconfirmed, txid.as_bytes())
    }

    pub fn unconfirmed(&self) -> Vec<Txid> {
        let mut out = Vec::new();
        self.db.read(
            Table::Unconfirmed,
            |key, _| {
                out.extend(Txid::from_slice(key));
                true
            },
            Dir::Forward,
        );
        out
    }
}
