//! Node configuration for the Sieve wallet node.
//!
//! Provides [`NodeConfig`] with defaults for data directory, RPC binding,
//! storage limits and the wallet pipeline.

use std::path::PathBuf;

use sieve_core::constants::DEFAULT_RPC_PORT;
use sieve_storage::StorageConfig;
use sieve_wallet::WalletConfig;

use crate::error::NodeError;

/// Configuration for a node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// IP address for the JSON-RPC server to bind to.
    pub rpc_bind: String,
    /// Port for the JSON-RPC server.
    pub rpc_port: u16,
    /// Log level filter string (e.g. "info", "debug", "sieve_wallet=trace").
    pub log_level: String,
    /// LMDB environment limits.
    pub storage: StorageConfig,
    /// Sync pipeline limits and watched accounts.
    pub wallet: WalletConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sieve");

        Self {
            data_dir,
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            log_level: "info".to_string(),
            storage: StorageConfig::default(),
            wallet: WalletConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Path to the LMDB environment directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("walletdb")
    }

    /// Socket address string for the RPC server.
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_bind, self.rpc_port)
    }

    /// Check engine limits and pipeline settings before anything opens.
    pub fn validate(&self) -> Result<(), NodeError> {
        self.storage.validate()?;
        self.wallet.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_core::constants::{DEFAULT_DOWNLOAD_LIMIT, DEFAULT_MAP_SIZE};
    use sieve_wallet::AccountConfig;

    #[test]
    fn defaults_listen_locally() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.rpc_addr(), format!("127.0.0.1:{DEFAULT_RPC_PORT}"));
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn default_data_dir_is_named_sieve() {
        let cfg = NodeConfig::default();
        assert!(cfg.data_dir.ends_with("sieve"), "{:?}", cfg.data_dir);
        assert!(cfg.db_path().starts_with(&cfg.data_dir));
    }

    #[test]
    fn default_pipeline_watches_nothing() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.storage.map_size, DEFAULT_MAP_SIZE);
        assert_eq!(cfg.wallet.download_limit, DEFAULT_DOWNLOAD_LIMIT);
        assert!(cfg.wallet.accounts.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn custom_bind_and_dir() {
        let cfg = NodeConfig {
            data_dir: PathBuf::from("/tmp/sieve-test"),
            rpc_bind: "0.0.0.0".to_string(),
            rpc_port: 9999,
            ..NodeConfig::default()
        };
        assert_eq!(cfg.rpc_addr(), "0.0.0.0:9999");
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/sieve-test/walletdb"));
    }

    #[test]
    fn zero_map_size_rejected() {
        let mut cfg = NodeConfig::default();
        cfg.storage.map_size = 0;
        assert!(matches!(cfg.validate(), Err(NodeError::Storage(_))));
    }

    #[test]
    fn repeated_account_rejected() {
        let mut cfg = NodeConfig::default();
        let account = AccountConfig {
            account: 3,
            external: vec!["ab".into()],
            internal: vec![],
        };
        cfg.wallet.accounts = vec![account.clone(), account];
        assert!(matches!(cfg.validate(), Err(NodeError::Wallet(_))));
    }
}
