//! Store Module
//!
//! The per-process connection to the upstream key-value store.
//!
//! A worker owns exactly one [`StoreConnection`]. Bootstrap builds it once and
//! injects it into the HTTP state; every request shares that single handle.

mod address;
mod connection;
mod entry;
mod memory;


use thiserror::Error;

pub use address::UpstreamAddr;
pub use connection::{ConnectionOptions, ConnectionState, StoreConnection};
pub use entry::StoredEntry;
pub use memory::{MemoryStore, TTL_KEY_ABSENT, TTL_NO_EXPIRY};

// == Store Error Enum ==
/// Failure of a single store operation.
///
/// Transport errors never escape as-is: they are classified into one of
/// these kinds after being logged.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A read command (`GET`, `EXISTS`, `TTL`) was rejected by the upstream
    #[error("failed to read key '{key}': {source}")]
    Read {
        key: String,
        #[source]
        source: redis::RedisError,
    },

    /// A write command (`SET`, `DEL`, `EXPIRE`) was rejected by the upstream
    #[error("failed to write key '{key}': {source}")]
    Write {
        key: String,
        #[source]
        source: redis::RedisError,
    },

    /// The connection could not be established, dropped, timed out or was closed
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The configured upstream address is not understood
    #[error("invalid store address: {0}")]
    InvalidAddress(String),
}

/// Convenience Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
