//! Error types for the node inventory store.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for raw backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors returned by [`NodeInventoryStore`](crate::NodeInventoryStore).
///
/// None of these are fatal. The caller decides whether to retry, degrade, or
/// give up.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to backing store: {0}")]
    Connection(String),

    /// A write failed. `written` records before `key` in the same call are
    /// already visible to readers.
    #[error("failed to persist {key} ({written} record(s) already written): {cause}")]
    Persist {
        key: String,
        written: usize,
        cause: PersistCause,
    },

    #[error("failed to read {key}: {cause}")]
    Read { key: String, cause: ReadCause },
}

#[derive(Debug, Error)]
pub enum PersistCause {
    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("write error: {0}")]
    Write(String),
}

#[derive(Debug, Error)]
pub enum ReadCause {
    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("read error: {0}")]
    Read(String),
}

/// Errors raised by a [`KvBackend`](crate::KvBackend) implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The backend answered, but refused the command for this key (for
    /// example a Redis `WRONGTYPE` reply). The connection stays usable.
    #[error("server error: {0}")]
    Server(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError::Io(e.to_string())
    }
}
