//! Database error types

use taskmart_types::MarketError;
use thiserror::Error;

/// Ledger operation errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Domain rule rejected the write (state conflict, invalid transition)
    #[error(transparent)]
    Market(#[from] MarketError),
}

impl DbError {
    /// Optimistic precondition failed; never retried automatically
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Market(e) if e.is_conflict())
    }

    /// The ledger could not be reached or the query failed mid-flight
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Query(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

/// Result type for database operations
pub type DbResult<T> = Result<T, DbError>;

/// Map a unique-constraint violation to `Duplicate`, anything else to `Query`
pub(crate) fn map_unique(err: sqlx::Error, what: impl Into<String>) -> DbError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => DbError::Duplicate(what.into()),
        _ => DbError::Query(err),
    }
}
