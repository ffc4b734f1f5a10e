//! Friendship requests and the pair state machine.
//!
//! A pair is stored once, with `user_a < user_b`; callers pass the two
//! users in any order.

use crate::{FriendshipState, StoreError};
use rusqlite::{params, Connection, OptionalExtension};

fn ordered(a: i64, b: i64) -> (i64, i64) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Records a friendship request from `from` to `to`.
///
/// Fails with a constraint error if any friendship row already exists for
/// the pair, including a block.
pub fn request_friendship(conn: &Connection, from: i64, to: i64) -> Result<(), StoreError> {
    let (user_a, user_b) = ordered(from, to);
    let state = serde_json::to_string(&FriendshipState::Pending)?;
    conn.execute(
        "INSERT INTO friendships (user_a, user_b, state, requested_by) VALUES (?1, ?2, ?3, ?4)",
        params![user_a, user_b, state, from],
    )?;
    Ok(())
}

/// Accepts a pending request. Only the user who did not send the request
/// can accept it.
pub fn accept_friendship(conn: &Connection, acceptor: i64, other: i64) -> Result<(), StoreError> {
    let (user_a, user_b) = ordered(acceptor, other);
    let pending = serde_json::to_string(&FriendshipState::Pending)?;
    let accepted = serde_json::to_string(&FriendshipState::Accepted)?;
    let updated = conn.execute(
        "UPDATE friendships
         SET state = ?1, updated_at = datetime('now')
         WHERE user_a = ?2 AND user_b = ?3 AND state = ?4 AND requested_by != ?5",
        params![accepted, user_a, user_b, pending, acceptor],
    )?;
    if updated == 0 {
        return Err(StoreError::FriendshipNotFound(user_a, user_b));
    }
    Ok(())
}

/// Blocks the pair, regardless of current state; creates the row if none
/// exists.
pub fn block(conn: &Connection, blocker: i64, other: i64) -> Result<(), StoreError> {
    let (user_a, user_b) = ordered(blocker, other);
    let blocked = serde_json::to_string(&FriendshipState::Blocked)?;
    conn.execute(
        "INSERT INTO friendships (user_a, user_b, state, requested_by) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (user_a, user_b)
         DO UPDATE SET state = excluded.state, requested_by = excluded.requested_by,
                       updated_at = datetime('now')",
        params![user_a, user_b, blocked, blocker],
    )?;
    Ok(())
}

/// Current state between two users, if any row exists.
pub fn state_between(
    conn: &Connection,
    a: i64,
    b: i64,
) -> Result<Option<FriendshipState>, StoreError> {
    let (user_a, user_b) = ordered(a, b);
    let state_json: Option<String> = conn
        .query_row(
            "SELECT state FROM friendships WHERE user_a = ?1 AND user_b = ?2",
            params![user_a, user_b],
            |row| row.get(0),
        )
        .optional()?;
    match state_json {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// User ids of everyone `user_id` has an accepted friendship with.
pub fn list_friends(conn: &Connection, user_id: i64) -> Result<Vec<i64>, StoreError> {
    let accepted = serde_json::to_string(&FriendshipState::Accepted)?;
    let mut stmt = conn.prepare(
        "SELECT CASE WHEN user_a = ?1 THEN user_b ELSE user_a END AS friend
         FROM friendships
         WHERE (user_a = ?1 OR user_b = ?1) AND state = ?2
         ORDER BY friend ASC",
    )?;
    let rows = stmt.query_map(params![user_id, accepted], |row| row.get(0))?;
    let mut friends = Vec::new();
    for row in rows {
        friends.push(row?);
    }
    Ok(friends)
}
