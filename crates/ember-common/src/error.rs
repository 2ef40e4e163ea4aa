//! Error types for EmberDB.

use thiserror::Error;

/// Result type alias using EmberError.
pub type Result<T> = std::result::Result<T, EmberError>;

/// Errors that can occur in EmberDB operations.
#[derive(Debug, Error)]
pub enum EmberError {
    // I/O errors (file-backed pools)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Pool errors
    #[error("Pool exhausted: requested {requested} bytes, {available} available")]
    PoolExhausted { requested: usize, available: usize },

    #[error("Pool too small: {capacity} bytes (minimum {minimum})")]
    PoolTooSmall { capacity: usize, minimum: usize },

    #[error("Invalid pool offset: {offset} (pool capacity {capacity})")]
    InvalidOffset { offset: u64, capacity: usize },

    // Index errors
    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    // Configuration errors
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },
}
