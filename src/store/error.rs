//! Identity store error types
//!
//! "Not found" is never an error here; lookups return `Option`.

use thiserror::Error;

/// Errors that can occur in the identity store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Neither a name nor an opaque key was supplied
    #[error("Invalid identity: a name or an opaque key is required")]
    InvalidIdentity,

    /// A record is undersized or its lengths don't add up
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// Disk or file failure opening, writing or recreating the log
    #[error("Log IO error: {0}")]
    LogIo(#[from] std::io::Error),

    /// Log header is missing, damaged or from an incompatible platform
    #[error("Invalid log: {0}")]
    InvalidLog(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A table or arena would exceed its addressable size
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),
}

/// Result type alias for identity store operations
pub type StoreResult<T> = Result<T, StoreError>;
