//! Sieve wallet node binary.
//!
//! Opens the LMDB store, starts one sync actor per watched subchain and
//! serves JSON-RPC for monitoring and for feeding headers, blocks and
//! mempool transactions in.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use sieve_core::constants::{
    DEFAULT_CACHE_LIMIT, DEFAULT_DOWNLOAD_LIMIT, DEFAULT_MAP_SIZE, DEFAULT_PROCESS_LIMIT,
    DEFAULT_RPC_PORT, DEFAULT_TICK_MS,
};
use sieve_node_lib::{start_rpc_server, Node, NodeConfig};
use sieve_wallet::AccountConfig;
use tracing::{error, info};

/// Sieve wallet node.
#[derive(Parser, Debug)]
#[command(
    name = "sieve-node",
    version,
    about = "Wallet node syncing subchains against an LMDB-backed block pipeline"
)]
struct Args {
    /// Data directory for the LMDB environment
    #[arg(long, default_value = None)]
    data_dir: Option<PathBuf>,

    /// RPC server bind address
    #[arg(long, default_value = "127.0.0.1")]
    rpc_bind: String,

    /// RPC server port
    #[arg(long, default_value_t = DEFAULT_RPC_PORT)]
    rpc_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Maximum concurrent block downloads per subchain
    #[arg(long, default_value_t = DEFAULT_DOWNLOAD_LIMIT)]
    download_limit: usize,

    /// Maximum blocks matched concurrently per subchain
    #[arg(long, default_value_t = DEFAULT_PROCESS_LIMIT)]
    process_limit: usize,

    /// Resolved blocks kept in memory
    #[arg(long, default_value_t = DEFAULT_CACHE_LIMIT)]
    cache_limit: usize,

    /// Actor housekeeping interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_TICK_MS)]
    tick_ms: u64,

    /// LMDB map size in bytes
    #[arg(long, default_value_t = DEFAULT_MAP_SIZE)]
    map_size: usize,

    /// Receive patterns for account 0 (comma-separated hex)
    #[arg(long, value_delimiter = ',')]
    watch: Vec<String>,

    /// Change patterns for account 0 (comma-separated hex)
    #[arg(long, value_delimiter = ',')]
    watch_change: Vec<String>,
}

impl Args {
    /// Convert CLI args into a NodeConfig.
    fn into_config(self) -> Result<(NodeConfig, String)> {
        for pattern in self.watch.iter().chain(&self.watch_change) {
            let bytes = hex::decode(pattern).with_context(|| format!("invalid pattern {pattern:?}"))?;
            if bytes.is_empty() {
                bail!("empty pattern");
            }
        }

        let mut config = NodeConfig::default();
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        config.rpc_bind = self.rpc_bind;
        config.rpc_port = self.rpc_port;
        config.log_level = self.log_level;
        config.storage.map_size = self.map_size;
        config.wallet.download_limit = self.download_limit;
        config.wallet.process_limit = self.process_limit;
        config.wallet.cache_limit = self.cache_limit;
        config.wallet.tick_interval = Duration::from_millis(self.tick_ms);
        if !self.watch.is_empty() || !self.watch_change.is_empty() {
            config.wallet.accounts = vec![AccountConfig {
                account: 0,
                external: self.watch,
                internal: self.watch_change,
            }];
        }
        config.validate().context("invalid node settings")?;

        Ok((config, self.log_format))
    }
}

#[tokio::main]
async fn main() {
    // Parse CLI arguments.
    let args = Args::parse();
    let (config, log_format) = match args.into_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(2);
        }
    };

    // Initialize logging.
    init_logging(&config.log_level, &log_format);

    info!("Sieve node v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);
    info!("rpc_addr: {}", config.rpc_addr());
    info!(
        "pipeline: download_limit={} process_limit={} cache_limit={}",
        config.wallet.download_limit, config.wallet.process_limit, config.wallet.cache_limit
    );

    // Open storage and start the wallet.
    let node = match Node::open(config.clone()) {
        Ok(n) => n,
        Err(e) => {
            error!("failed to open node: {}", e);
            process::exit(1);
        }
    };

    let tip = node.best_block();
    info!(
        "best_block: height={} hash={}",
        tip.height,
        hex::encode(tip.hash.as_bytes())
    );

    // Start RPC server.
    let rpc_handle = match start_rpc_server(&config.rpc_addr(), node.clone()).await {
        Ok(handle) => {
            info!("RPC server listening on {}", config.rpc_addr());
            handle
        }
        Err(e) => {
            error!("failed to start RPC server: {}", e);
            process::exit(1);
        }
    };

    info!("Sieve node running (Ctrl+C to stop)");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl+C: {}", e);
    }
    info!("shutdown signal received");

    rpc_handle.stop().ok();
    info!("RPC server stopped");
    node.shutdown().await;
    info!("Sieve node shutdown complete");
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse_from(std::iter::once("sieve-node").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_map_onto_config() {
        let (config, format) = parse(&[]).into_config().unwrap();
        assert_eq!(format, "text");
        assert_eq!(config.rpc_port, DEFAULT_RPC_PORT);
        assert_eq!(config.wallet.download_limit, DEFAULT_DOWNLOAD_LIMIT);
        assert!(config.wallet.accounts.is_empty());
    }

    #[test]
    fn watch_lists_become_account_zero() {
        let (config, _) = parse(&["--watch", "aabb,ccdd", "--watch-change", "eeff"])
            .into_config()
            .unwrap();
        let account = &config.wallet.accounts[0];
        assert_eq!(account.external, vec!["aabb", "ccdd"]);
        assert_eq!(account.internal, vec!["eeff"]);
    }

    #[test]
    fn bad_pattern_rejected() {
        assert!(parse(&["--watch", "xyz"]).into_config().is_err());
    }

    #[test]
    fn zero_download_limit_rejected() {
        assert!(parse(&["--download-limit", "0"]).into_config().is_err());
    }

    #[test]
    fn custom_data_dir() {
        let (config, _) = parse(&["--data-dir", "/tmp/sieve-x", "--log-format", "json"])
            .into_config()
            .unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/tmp/sieve-x/walletdb"));
    }
}
