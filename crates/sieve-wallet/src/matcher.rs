//! Block and transaction matching against subchain patterns.
//!
//! Scanning is pure and runs off the actor: it records every output whose
//! script embeds a pattern and every outpoint the block spends. Whether a
//! spent outpoint belongs to the wallet is decided later, in height order,
//! when the scan is applied to the store.

use sieve_core::types::{Block, OutPoint, Pattern, Transaction, Txid};

/// An output paying to one of the subchain's patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub txid: Txid,
    pub outpoint: OutPoint,
    pub value: u64,
    /// Derivation index of the matching pattern.
    pub index: u32,
}

/// An outpoint consumed by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spend {
    pub txid: Txid,
    pub outpoint: OutPoint,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockScan {
    pub received: Vec<Received>,
    pub spends: Vec<Spend>,
}

impl BlockScan {
    pub fn is_empty(&self) -> bool {
        self.received.is_empty() && self.spends.is_empty()
    }
}

fn matching_pattern<'a>(patterns: &'a [Pattern], script: &[u8]) -> Option<&'a Pattern> {
    patterns.iter().find(|p| p.matches(script))
}

pub fn scan_transaction(tx: &Transaction, patterns: &[Pattern], scan: &mut BlockScan) {
    let txid = tx.txid();
    for (i, output) in tx.outputs.iter().enumerate() {
        if let Some(pattern) = matching_pattern(patterns, &output.script) {
            scan.received.push(Received {
                txid,
                outpoint: OutPoint {
                    txid,
                    index: i as u32,
                },
                value: output.value,
                index: pattern.index,
            });
        }
    }
    if tx.is_coinbase() {
        return;
    }
    for input in &tx.inputs {
        scan.spends.push(Spend {
            txid,
            outpoint: input.previous_output,
        });
    }
}

pub fn scan_block(block: &Block, patterns: &[Pattern]) -> BlockScan {
    let mut scan = BlockScan::default();
    for tx in &block.transactions {
        scan_transaction(tx, patterns, &mut scan);
    }
    scan
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_core::mock::{make_block, pay_to, spend};
    use sieve_core::types::Hash256;

    fn patterns() -> Vec<Pattern> {
        vec![Pattern::new(0, vec![0xAA; 20]), Pattern::new(1, vec![0xBB; 20])]
    }

    #[test]
    fn matching_outputs_are_received() {
        let tx = pay_to(&[0xBB; 20], 500, 1);
        let block = make_block(Hash256::ZERO, 0, vec![tx.clone(), pay_to(&[0xCC; 20], 9, 2)]);
        let scan = scan_block(&block, &patterns());
        assert_eq!(scan.received.len(), 1);
        let received = &scan.received[0];
        assert_eq!(received.txid, tx.txid());
        assert_eq!(received.outpoint, OutPoint { txid: tx.txid(), index: 0 });
        assert_eq!(received.value, 500);
        assert_eq!(received.index, 1);
    }

    #[test]
    fn coinbase_inputs_are_not_spends() {
        let block = make_block(Hash256::ZERO, 0, vec![pay_to(&[0xAA; 20], 1, 0)]);
        assert!(scan_block(&block, &patterns()).spends.is_empty());
    }

    #[test]
    fn every_regular_input_is_recorded() {
        let op = OutPoint { txid: Hash256([4; 32]), index: 2 };
        let tx = spend(op, 10);
        let block = make_block(Hash256::ZERO, 0, vec![tx.clone()]);
        let scan = scan_block(&block, &patterns());
        assert_eq!(scan.spends, vec![Spend { txid: tx.txid(), outpoint: op }]);
        assert!(scan.received.is_empty());
    }

    #[test]
    fn empty_block_scans_empty() {
        let block = make_block(Hash256::ZERO, 0, vec![]);
        assert!(scan_block(&block, &patterns()).is_empty());
    }
}
