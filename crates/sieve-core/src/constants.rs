//! Pipeline defaults shared across crates.

/// Maximum concurrent block downloads per subchain.
pub const DEFAULT_DOWNLOAD_LIMIT: usize = 10;

/// Maximum blocks being matched concurrently per subchain.
pub const DEFAULT_PROCESS_LIMIT: usize = 4;

/// Number of resolved blocks kept in the in-memory cache.
pub const DEFAULT_CACHE_LIMIT: usize = 100;

/// Actor housekeeping interval in milliseconds.
pub const DEFAULT_TICK_MS: u64 = 500;

/// Capacity of the broadcast channels that fan out chain and block events.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Default LMDB map size: 1 GiB.
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;

/// Default LMDB reader slots.
pub const DEFAULT_MAX_READERS: u32 = 1024;

/// Default JSON-RPC port.
pub const DEFAULT_RPC_PORT: u16 = 28_332;
