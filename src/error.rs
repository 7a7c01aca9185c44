use thiserror::Error;

/// Every failure this crate can surface to a caller.
///
/// A fatal storage failure poisons the core, a destroyed core fails fast, a
/// transfer failure is retryable by the caller, a cancellation is delivered
/// explicitly, and an on-disk inconsistency is reported rather than patched
/// over silently.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("storage I/O error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("operation attempted on a destroyed core")]
    Destroyed,

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("on-disk state inconsistent: {0}")]
    Corrupt(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl From<rocksdb::Error> for CoreError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}
