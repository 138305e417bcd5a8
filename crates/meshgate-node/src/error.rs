//! Error types for the meshgate daemons.

use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the responder or the reconciliation pass.
#[derive(Debug, Error)]
pub enum Error {
    /// Queue or cache error
    #[error("Store error: {0}")]
    Store(#[from] meshgate_store::Error),

    /// Wire contract violation
    #[error("Protocol error: {0}")]
    Protocol(#[from] meshgate_protocol::Error),

    /// Transport error talking to the controller
    #[error("Network error: {0}")]
    Network(String),

    /// The controller answered, but not with what we asked for
    #[error("Controller error: {0}")]
    Controller(String),

    /// No identity snapshot recorded for a node
    #[error("no identity snapshot for {0}")]
    MissingIdentity(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Daemon already running
    #[error("already running with pid {0}")]
    AlreadyRunning(u32),

    /// Process control failure
    #[error("Process error: {0}")]
    Process(String),

    /// Blocking task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Task(e.to_string())
    }
}
