//! User accounts and language preferences.

use crate::StoreError;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// A chat user.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// Internal database ID.
    pub id: i64,
    /// Unique login name.
    pub username: String,
    /// Display name shown in clients.
    pub display_name: String,
    /// BCP 47 language tag translations are served in.
    pub preferred_language: String,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
    /// Last activity timestamp, if the user was ever seen.
    pub last_seen_at: Option<String>,
}

/// Parameters for creating a new user.
#[derive(Debug, Clone)]
pub struct CreateUserParams {
    pub username: String,
    pub display_name: String,
    pub preferred_language: String,
}

fn map_row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        preferred_language: row.get(3)?,
        created_at: row.get(4)?,
        last_seen_at: row.get(5)?,
    })
}

const USER_COLUMNS: &str =
    "id, username, display_name, preferred_language, created_at, last_seen_at";

/// Creates a new user and returns the stored row.
pub fn create_user(conn: &Connection, params: &CreateUserParams) -> Result<User, StoreError> {
    conn.execute(
        "INSERT INTO users (username, display_name, preferred_language) VALUES (?1, ?2, ?3)",
        params![
            params.username,
            params.display_name,
            params.preferred_language
        ],
    )?;
    get_user(conn, conn.last_insert_rowid())
}

/// Retrieves a user by internal ID.
pub fn get_user(conn: &Connection, id: i64) -> Result<User, StoreError> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        [id],
        map_row_to_user,
    )
    .optional()?
    .ok_or_else(|| StoreError::UserNotFound(id.to_string()))
}

/// Retrieves a user by login name.
pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<User, StoreError> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
        [username],
        map_row_to_user,
    )
    .optional()?
    .ok_or_else(|| StoreError::UserNotFound(username.to_string()))
}

/// Updates the language translations are served in for this user.
pub fn set_preferred_language(
    conn: &Connection,
    id: i64,
    language: &str,
) -> Result<(), StoreError> {
    let updated = conn.execute(
        "UPDATE users SET preferred_language = ?1 WHERE id = ?2",
        params![language, id],
    )?;
    if updated == 0 {
        return Err(StoreError::UserNotFound(id.to_string()));
    }
    Ok(())
}

/// Stamps the user's last-seen time with the current instant.
pub fn touch_last_seen(conn: &Connection, id: i64) -> Result<(), StoreError> {
    let updated = conn.execute(
        "UPDATE users SET last_seen_at = datetime('now') WHERE id = ?1",
        [id],
    )?;
    if updated == 0 {
        return Err(StoreError::UserNotFound(id.to_string()));
    }
    Ok(())
}

/// Deletes a user. Memberships, tokens, friendships, and quota rows cascade.
pub fn delete_user(conn: &Connection, id: i64) -> Result<(), StoreError> {
    let deleted = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
    if deleted == 0 {
        return Err(StoreError::UserNotFound(id.to_string()));
    }
    Ok(())
}
