//! Error types for meshgate-protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while validating or decoding wire messages.
#[derive(Debug, Error)]
pub enum Error {
    /// The string is not a 10-digit hex node address.
    #[error("invalid node ID: {0:?}")]
    InvalidNodeId(String),

    /// The string is not a 16-digit hex network ID.
    #[error("invalid network ID: {0:?}")]
    InvalidNetworkId(String),

    /// Neither a bare node ID nor a structured announce object.
    #[error("malformed announce message: {0}")]
    MalformedAnnounce(String),

    /// A configuration payload that cannot be served to a node.
    #[error("malformed cfg message: {0}")]
    MalformedCfg(String),

    /// JSON encoding/decoding failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
