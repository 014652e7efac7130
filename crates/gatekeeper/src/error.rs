//! Error types for the gatekeeper service

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gatekeeper operations
pub type Result<T> = std::result::Result<T, GatekeeperError>;

/// Errors that can occur in the gatekeeper service
#[derive(Debug, Error)]
pub enum GatekeeperError {
    /// Allow-list file could not be created, read, or written
    #[error("storage error on {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Allow-list file contents are not a serialized string list
    #[error("{} is not a valid IP list: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// IP is already present in the allow-list
    #[error("IP address already exists in the whitelist: {0}")]
    Conflict(String),

    /// IP is not present in the allow-list
    #[error("IP address is not whitelisted: {0}")]
    NotFound(String),

    /// The operating system entropy source failed
    #[error("random source failure: {0}")]
    RandomSource(#[from] rand::Error),

    /// A notification could not be handed to the mail transport
    #[error("notification delivery failed: {0}")]
    Delivery(String),

    /// Backend dial or socket failure
    #[error("cannot reach {addr}: {source}")]
    Connectivity {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error raised by the shared core crate
    #[error(transparent)]
    Core(#[from] gatekeeper_core::CoreError),
}

impl GatekeeperError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}
