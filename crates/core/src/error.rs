//! Errors raised by the shared gatekeeper crate

use std::path::PathBuf;

/// Result type for core operations
pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The log file or its directory could not be prepared
    #[error("log sink {}: {source}", path.display())]
    LogSink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A global tracing subscriber could not be installed
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

impl CoreError {
    pub fn log_sink(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LogSink {
            path: path.into(),
            source,
        }
    }
}
