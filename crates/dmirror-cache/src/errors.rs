//! Error type for the cache crate.

use thiserror::Error;

/// Errors raised by [`crate::DatabasePool`] and [`crate::SqliteSyncIndex`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to open or configure the SQLite connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The schema migration failed to apply.
    #[error("migration failed: {0}")]
    MigrationFailed(String),
    /// A query failed.
    #[error("query failed: {0}")]
    QueryFailed(String),
    /// No transaction is open, but one was required.
    #[error("no transaction is open")]
    NoTransaction,
    /// A transaction is already open; nested transactions are unsupported.
    #[error("a transaction is already open")]
    TransactionAlreadyOpen,
    /// A stored value could not be decoded back into its domain type.
    #[error("deserialization failed: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        CacheError::QueryFailed(err.to_string())
    }
}
