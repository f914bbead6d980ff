//! Table identifiers. Call sites name tables by enum; names are resolved to
//! database handles once when the environment opens.

use lmdb::DatabaseFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    /// block hash -> encoded header
    BlockHeaders,
    /// height (native usize) -> block hash
    BestChain,
    /// block hash -> encoded block
    Blocks,
    /// subchain id -> last processed position
    SubchainPosition,
    /// outpoint -> encoded wallet output
    WalletOutputs,
    /// subchain id ++ height -> outpoint (duplicates)
    OutputsByHeight,
    /// subchain id ++ height -> outpoint (duplicates)
    SpentByHeight,
    /// txid -> encoded transaction
    Unconfirmed,
}

impl Table {
    pub const ALL: [Table; 8] = [
        Table::BlockHeaders,
        Table::BestChain,
        Table::Blocks,
        Table::SubchainPosition,
        Table::WalletOutputs,
        Table::OutputsByHeight,
        Table::SpentByHeight,
        Table::Unconfirmed,
    ];

    /// Stable on-disk name.
    pub fn name(self) -> &'static str {
        match self {
            Table::BlockHeaders => "block_headers",
            Table::BestChain => "best_chain",
            Table::Blocks => "blocks",
            Table::SubchainPosition => "subchain_position",
            Table::WalletOutputs => "wallet_outputs",
            Table::OutputsByHeight => "outputs_by_height",
            Table::SpentByHeight => "spent_by_height",
            Table::Unconfirmed => "unconfirmed",
        }
    }

    /// Index tables keep several values per key; primary tables do not.
    /// `BestChain` is keyed by native-width integers so cursor order is
    /// height order.
    pub fn flags(self) -> DatabaseFlags {
        match self {
            Table::OutputsByHeight | Table::SpentByHeight => DatabaseFlags::DUP_SORT,
            Table::BestChain => DatabaseFlags::INTEGER_KEY,
            _ => DatabaseFlags::empty(),
        }
    }

    pub fn allows_duplicates(self) -> bool {
        self.flags().contains(DatabaseFlags::DUP_SORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique() {
        let names: HashSet<_> = Table::ALL.iter().map(|t| t.name()).collect();
        assert_eq!(names.len(), Table::ALL.len());
    }

    #[test]
    fn only_index_tables_allow_duplicates() {
        assert!(Table::OutputsByHeight.allows_duplicates());
        assert!(Table::SpentByHeight.allows_duplicates());
        assert!(!Table::Blocks.allows_duplicates());
        assert!(!Table::BestChain.allows_duplicates());
    }
}
