//! Engine limits fixed at environment creation.

use lmdb::EnvironmentFlags;

use sieve_core::constants::{DEFAULT_MAP_SIZE, DEFAULT_MAX_READERS};

use crate::error::StorageError;

/// Immutable LMDB environment settings. Changing them requires reopening
/// the environment.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Maximum size of the memory map in bytes.
    pub map_size: usize,
    /// Maximum concurrent read transactions.
    pub max_readers: u32,
    /// Named tables reserved beyond the built-in set.
    pub extra_tables: u32,
    /// Environment flags passed to `mdb_env_open`.
    pub flags: EnvironmentFlags,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            map_size: DEFAULT_MAP_SIZE,
            max_readers: DEFAULT_MAX_READERS,
            extra_tables: 0,
            // Read transactions may be created on one tokio worker and
            // dropped on another.
            flags: EnvironmentFlags::NO_TLS,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.map_size == 0 {
            return Err(StorageError::Config("map size must be non-zero".into()));
        }
        if self.max_readers == 0 {
            return Err(StorageError::Config("max readers must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits() {
        let cfg = StorageConfig::default();
        assert_eq!(cfg.map_size, 1 << 30);
        assert_eq!(cfg.max_readers, 1024);
        assert!(cfg.flags.contains(EnvironmentFlags::NO_TLS));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_map_size_rejected() {
        let cfg = StorageConfig {
            map_size: 0,
            ..StorageConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(StorageError::Config(_))));
    }

    #[test]
    fn zero_readers_rejected() {
        let cfg = StorageConfig {
            max_readers: 0,
            ..StorageConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
