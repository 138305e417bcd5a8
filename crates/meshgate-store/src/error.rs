//! Error types for meshgate-store.

use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in queue or cache operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage engine error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unknown queue name
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// A transaction body asked to abort
    #[error("Transaction aborted: {0}")]
    Aborted(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
