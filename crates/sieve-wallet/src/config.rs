//! Wallet pipeline configuration.

use std::time::Duration;

use sieve_core::constants::{
    DEFAULT_CACHE_LIMIT, DEFAULT_DOWNLOAD_LIMIT, DEFAULT_PROCESS_LIMIT, DEFAULT_TICK_MS,
};
use sieve_core::types::{Pattern, SubchainId, SubchainKind};

use crate::error::WalletError;

/// Key patterns for one account. Each entry is a hex-encoded element that
/// matching output scripts embed; its list position is its derivation index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountConfig {
    pub account: u32,
    pub external: Vec<String>,
    pub internal: Vec<String>,
}

impl AccountConfig {
    pub fn patterns(&self, kind: SubchainKind) -> Result<Vec<Pattern>, WalletError> {
        let source = match kind {
            SubchainKind::External => &self.external,
            SubchainKind::Internal => &self.internal,
        };
        source
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let element = hex::decode(s)
                    .map_err(|e| WalletError::InvalidPattern(format!("{s}: {e}")))?;
                if element.is_empty() {
                    return Err(WalletError::InvalidPattern("empty pattern".into()));
                }
                Ok(Pattern::new(i as u32, element))
            })
            .collect()
    }

    /// Subchains with at least one pattern.
    pub fn subchains(&self) -> Vec<SubchainId> {
        let mut out = Vec::with_capacity(2);
        if !self.external.is_empty() {
            out.push(SubchainId::new(self.account, SubchainKind::External));
        }
        if !self.internal.is_empty() {
            out.push(SubchainId::new(self.account, SubchainKind::Internal));
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Maximum concurrent block downloads per subchain.
    pub download_limit: usize,
    /// Maximum blocks being matched concurrently per subchain.
    pub process_limit: usize,
    /// Resolved blocks kept in the shared memory cache.
    pub cache_limit: usize,
    /// Period of the actor's housekeeping pass.
    pub tick_interval: Duration,
    pub accounts: Vec<AccountConfig>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            download_limit: DEFAULT_DOWNLOAD_LIMIT,
            process_limit: DEFAULT_PROCESS_LIMIT,
            cache_limit: DEFAULT_CACHE_LIMIT,
            tick_interval: Duration::from_millis(DEFAULT_TICK_MS),
            accounts: Vec::new(),
        }
    }
}

impl WalletConfig {
    pub fn validate(&self) -> Result<(), WalletError> {
        if self.download_limit == 0 {
            return Err(WalletError::Config("download limit must be at least 1".into()));
        }
        if self.process_limit == 0 {
            return Err(WalletError::Config("process limit must be at least 1".into()));
        }
        if self.tick_interval.is_zero() {
            return Err(WalletError::Config("tick interval must be non-zero".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for account in &self.accounts {
            if !seen.insert(account.account) {
                return Err(WalletError::Config(format!("account {} listed twice", account.account)));
            }
        }
        Ok(())
    }

    /// Every configured subchain with its parsed patterns.
    pub fn subchains(&self) -> Result<Vec<(SubchainId, Vec<Pattern>)>, WalletError> {
        let mut out = Vec::new();
        for account in &self.accounts {
            for id in account.subchains() {
                out.push((id, account.patterns(id.kind)?));
            }
        }
        Ok(out)
    }
}
