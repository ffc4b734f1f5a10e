//! Error taxonomy for database operations.

use crate::migrations::MigrationError;
use crate::pool::PoolError;
use thiserror::Error;

/// Errors surfaced by pool-routed database operations.
///
/// The busy classification drives the transaction coordinator: only
/// [`DbError::is_busy`] errors are ever retried. Application errors pass
/// through verbatim so constraint violations and domain failures reach the
/// caller unchanged.
#[derive(Debug, Error)]
pub enum DbError {
    /// The pool could not provide a connection.
    #[error("connection pool error: {0}")]
    Pool(#[from] PoolError),

    /// An error from the underlying engine.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A migration failed during initialization.
    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),

    /// An error raised by the caller's unit of work.
    #[error(transparent)]
    Application(Box<dyn std::error::Error + Send + Sync + 'static>),

    /// I/O outside the engine (backup snapshots, directory handling).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking worker running the operation failed or panicked.
    #[error("database task failed: {0}")]
    Runtime(#[from] tokio::task::JoinError),
}

impl DbError {
    /// Wraps a business error so it survives the transaction machinery
    /// unchanged.
    pub fn application<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Application(Box::new(err))
    }

    /// Whether this error is transient single-writer contention.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Sqlite(err) => is_contention(err),
            _ => false,
        }
    }
}

/// Check if a rusqlite error is SQLITE_BUSY or SQLITE_LOCKED.
///
/// SQLITE_BUSY ("database is locked") occurs with file-based databases under
/// write contention. SQLITE_LOCKED ("database table is locked") occurs with
/// shared-cache in-memory databases when another connection holds a write
/// lock on the same table.
pub(crate) fn is_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy_error() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        )
    }

    #[test]
    fn busy_classification() {
        assert!(DbError::from(busy_error()).is_busy());
        assert!(!DbError::from(rusqlite::Error::QueryReturnedNoRows).is_busy());
    }

    #[test]
    fn application_errors_are_never_busy() {
        let err = DbError::application(std::io::Error::other("quota exceeded"));
        assert!(!err.is_busy());
    }
}
