//! Configuration structures for EmberDB.

use crate::error::{EmberError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Largest global depth a node directory may reach. Directory bits plus the
/// eight bucket bits must not exceed the 32-bit subkey width.
pub const MAX_GLOBAL_DEPTH: u8 = 24;

/// Minimum usable pool capacity: root anchor, root node, one segment.
pub const MIN_POOL_CAPACITY: usize = 64 * 1024;

/// Configuration for an EmberDB index instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Capacity of the persistent pool in bytes.
    pub pool_capacity: usize,
    /// Backing file for the pool. None uses anonymous memory.
    pub pool_path: Option<PathBuf>,
    /// Initial global depth of the root node's hash directory.
    pub initial_global_depth: u8,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 64 * 1024 * 1024, // 64 MB
            pool_path: None,
            initial_global_depth: 0,
        }
    }
}

impl IndexConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.pool_capacity < MIN_POOL_CAPACITY {
            return Err(EmberError::PoolTooSmall {
                capacity: self.pool_capacity,
                minimum: MIN_POOL_CAPACITY,
            });
        }
        if self.initial_global_depth > MAX_GLOBAL_DEPTH {
            return Err(EmberError::InvalidParameter {
                name: "initial_global_depth".to_string(),
                value: self.initial_global_depth.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = IndexConfig::default();
        assert_eq!(config.pool_capacity, 64 * 1024 * 1024);
        assert!(config.pool_path.is_none());
        assert_eq!(config.initial_global_depth, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_tiny_pool() {
        let config = IndexConfig {
            pool_capacity: 1024,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EmberError::PoolTooSmall { .. })
        ));
    }

    #[test]
    fn test_config_rejects_deep_directory() {
        let config = IndexConfig {
            initial_global_depth: MAX_GLOBAL_DEPTH + 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EmberError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_config_clone() {
        let config = IndexConfig {
            pool_capacity: MIN_POOL_CAPACITY,
            pool_path: Some(PathBuf::from("/mnt/pmem0/ember.pool")),
            initial_global_depth: 2,
        };
        let cloned = config.clone();
        assert_eq!(cloned.pool_capacity, config.pool_capacity);
        assert_eq!(cloned.pool_path, config.pool_path);
        assert_eq!(cloned.initial_global_depth, 2);
    }
}
