//! Unified error type for all store operations.

use thiserror::Error;

/// Things that can go wrong when using the store.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// File system problem (read, write, rename, remove).
    #[error("i/o error: {0}")]
    Io(String),
    /// A value could not be turned into a JSON document.
    #[error("encode error: {0}")]
    Encode(String),
    /// A stored document doesn't match the requested type, or a shard file
    /// failed to parse.
    #[error("decode error: {0}")]
    Decode(String),
    /// Bad configuration (zero shards, no runtime, etc.).
    #[error("config error: {0}")]
    Config(String),
    /// A blocking I/O task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Error::Io(err.to_string())
        } else if err.is_syntax() || err.is_eof() || err.is_data() {
            Error::Decode(err.to_string())
        } else {
            Error::Encode(err.to_string())
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Task(err.to_string())
    }
}

/// Result alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
