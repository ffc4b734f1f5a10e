//! Push notification device tokens.

use crate::StoreError;
use rusqlite::{params, Connection, Row};

/// A push token registered for one of a user's devices.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceToken {
    pub id: i64,
    pub user_id: i64,
    pub device_id: String,
    pub token: String,
    /// Last registration or refresh timestamp (ISO 8601).
    pub updated_at: String,
}

fn map_row_to_token(row: &Row<'_>) -> rusqlite::Result<DeviceToken> {
    Ok(DeviceToken {
        id: row.get(0)?,
        user_id: row.get(1)?,
        device_id: row.get(2)?,
        token: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

/// Registers or refreshes the token for a (user, device) pair.
pub fn upsert_token(
    conn: &Connection,
    user_id: i64,
    device_id: &str,
    token: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO device_tokens (user_id, device_id, token) VALUES (?1, ?2, ?3)
         ON CONFLICT (user_id, device_id)
         DO UPDATE SET token = excluded.token, updated_at = datetime('now')",
        params![user_id, device_id, token],
    )?;
    Ok(())
}

/// All tokens registered for a user, oldest registration first.
pub fn list_tokens_for_user(conn: &Connection, user_id: i64) -> Result<Vec<DeviceToken>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, device_id, token, updated_at FROM device_tokens
         WHERE user_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([user_id], map_row_to_token)?;
    let mut tokens = Vec::new();
    for row in rows {
        tokens.push(row?);
    }
    Ok(tokens)
}

/// Drops the token for one device. Unknown devices are a no-op.
pub fn delete_token(conn: &Connection, user_id: i64, device_id: &str) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM device_tokens WHERE user_id = ?1 AND device_id = ?2",
        params![user_id, device_id],
    )?;
    Ok(())
}

/// Drops tokens not refreshed within `days`. Returns how many were removed.
pub fn purge_tokens_older_than(conn: &Connection, days: u32) -> Result<usize, StoreError> {
    let purged = conn.execute(
        "DELETE FROM device_tokens WHERE updated_at < datetime('now', ?1)",
        [format!("-{days} days")],
    )?;
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_conn;
    use crate::users::{create_user, CreateUserParams};

    fn seed_user(conn: &Connection) -> i64 {
        create_user(
            conn,
            &CreateUserParams {
                username: "mobile".to_string(),
                display_name: "Mobile".to_string(),
                preferred_language: "en".to_string(),
            },
        )
        .expect("create user failed")
        .id
    }

    #[test]
    fn upsert_replaces_per_device() {
        let conn = setup_conn();
        let user_id = seed_user(&conn);

        upsert_token(&conn, user_id, "phone", "tok-1").expect("upsert failed");
        upsert_token(&conn, user_id, "tablet", "tok-2").expect("upsert failed");
        upsert_token(&conn, user_id, "phone", "tok-3").expect("refresh failed");

        let tokens = list_tokens_for_user(&conn, user_id).expect("list failed");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].device_id, "phone");
        assert_eq!(tokens[0].token, "tok-3");

        delete_token(&conn, user_id, "tablet").expect("delete failed");
        assert_eq!(list_tokens_for_user(&conn, user_id).expect("list failed").len(), 1);
    }

    #[test]
    fn purge_drops_stale_tokens() {
        let conn = setup_conn();
        let user_id = seed_user(&conn);

        upsert_token(&conn, user_id, "phone", "tok-1").expect("upsert failed");
        upsert_token(&conn, user_id, "tablet", "tok-2").expect("upsert failed");
        conn.execute(
            "UPDATE device_tokens SET updated_at = datetime('now', '-120 days') WHERE device_id = 'phone'",
            [],
        )
        .expect("backdate failed");

        let purged = purge_tokens_older_than(&conn, 90).expect("purge failed");
        assert_eq!(purged, 1);

        let tokens = list_tokens_for_user(&conn, user_id).expect("list failed");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].device_id, "tablet");
    }
}
