//! Typed repository accessors for the Polyglot chat platform.
//!
//! Every function here takes a borrowed `rusqlite::Connection` and is meant
//! to be wired through `polyglot_db`'s `with_connection` / `transaction`
//! entry points — this crate never acquires connections on its own, and
//! nothing here bypasses the pool.
//!
//! Multi-statement operations that must be atomic (quota charge plus
//! message insert, for example) compose naturally: pass several accessor
//! calls into one `transaction` closure.

use polyglot_db::DbError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod friendships;
pub mod groups;
pub mod messages;
pub mod quotas;
pub mod tokens;
pub mod users;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("group not found: {0}")]
    GroupNotFound(String),
    #[error("message not found: {0}")]
    MessageNotFound(String),
    #[error("no friendship between users {0} and {1}")]
    FriendshipNotFound(i64, i64),
    #[error(
        "translation quota exceeded for user {user_id}: requested {requested} chars, {remaining} remaining"
    )]
    QuotaExceeded {
        user_id: i64,
        requested: i64,
        remaining: i64,
    },
}

/// Store errors cross into the database layer without losing their shape:
/// raw engine errors stay engine errors (so the transaction coordinator can
/// still classify busy ones), domain errors ride along verbatim.
impl From<StoreError> for DbError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => DbError::Sqlite(e),
            other => DbError::application(other),
        }
    }
}

/// Kind of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// An ordinary user-authored message.
    Text,
    /// A platform-generated notice (joins, renames, quota warnings).
    System,
}

/// Friendship state machine: `Pending` → `Accepted`, or `Blocked` from
/// anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FriendshipState {
    /// Requested, awaiting the other user.
    Pending,
    /// Both sides confirmed.
    Accepted,
    /// One side blocked the pair.
    Blocked,
}

#[cfg(test)]
pub(crate) mod test_support {
    use rusqlite::Connection;

    /// A migrated in-memory connection with foreign keys on, matching what
    /// the pool's connection factory produces.
    pub(crate) fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .expect("should enable foreign keys");
        polyglot_db::run_migrations(&conn).expect("migrations should succeed");
        conn
    }
}
