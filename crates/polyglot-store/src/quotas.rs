//! Per-user daily translation character budgets.
//!
//! `charge` is read-modify-write and must run inside a transaction when
//! called from concurrent handlers; the coordinator's BEGIN IMMEDIATE keeps
//! two charges for the same user from interleaving.

use crate::StoreError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

/// Today's quota bucket, as a `YYYY-MM-DD` UTC day.
pub fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Characters already charged to a user for `day`.
pub fn chars_used(conn: &Connection, user_id: i64, day: &str) -> Result<i64, StoreError> {
    let used: Option<i64> = conn
        .query_row(
            "SELECT chars_used FROM translation_quotas WHERE user_id = ?1 AND day = ?2",
            params![user_id, day],
            |row| row.get(0),
        )
        .optional()?;
    Ok(used.unwrap_or(0))
}

/// Characters still available to a user for `day` under `daily_limit`.
pub fn remaining(
    conn: &Connection,
    user_id: i64,
    day: &str,
    daily_limit: i64,
) -> Result<i64, StoreError> {
    Ok((daily_limit - chars_used(conn, user_id, day)?).max(0))
}

/// Charges `chars` against the user's budget for `day`.
///
/// Fails with [`StoreError::QuotaExceeded`] — and records nothing — when
/// the charge would push usage past `daily_limit`. Returns the remaining
/// budget after the charge.
pub fn charge(
    conn: &Connection,
    user_id: i64,
    day: &str,
    chars: i64,
    daily_limit: i64,
) -> Result<i64, StoreError> {
    let used = chars_used(conn, user_id, day)?;
    if used + chars > daily_limit {
        return Err(StoreError::QuotaExceeded {
            user_id,
            requested: chars,
            remaining: (daily_limit - used).max(0),
        });
    }

    conn.execute(
        "INSERT INTO translation_quotas (user_id, day, chars_used) VALUES (?1, ?2, ?3)
         ON CONFLICT (user_id, day)
         DO UPDATE SET chars_used = chars_used + excluded.chars_used",
        params![user_id, day, chars],
    )?;
    Ok(daily_limit - used - chars)
}

/// Drops quota rows for days before `day`. Returns how many were removed.
pub fn prune_before(conn: &Connection, day: &str) -> Result<usize, StoreError> {
    let pruned = conn.execute("DELETE FROM translation_quotas WHERE day < ?1", [day])?;
    Ok(pruned)
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
                username: "translator".to_string(),
                display_name: "Translator".to_string(),
                preferred_language: "en".to_string(),
            },
        )
        .expect("create user failed")
        .id
    }

    #[test]
    fn charges_accumulate_within_the_limit() {
        let conn = setup_conn();
        let user_id = seed_user(&conn);

        assert_eq!(
            remaining(&conn, user_id, "2026-08-06", 1_000).expect("remaining failed"),
            1_000
        );
        assert_eq!(
            charge(&conn, user_id, "2026-08-06", 400, 1_000).expect("charge failed"),
            600
        );
        assert_eq!(
            charge(&conn, user_id, "2026-08-06", 600, 1_000).expect("charge failed"),
            0
        );
        assert_eq!(
            chars_used(&conn, user_id, "2026-08-06").expect("used failed"),
            1_000
        );
    }

    #[test]
    fn over_limit_charge_fails_and_records_nothing() {
        let conn = setup_conn();
        let user_id = seed_user(&conn);

        charge(&conn, user_id, "2026-08-06", 900, 1_000).expect("charge failed");
        match charge(&conn, user_id, "2026-08-06", 200, 1_000) {
            Err(StoreError::QuotaExceeded {
                requested: 200,
                remaining: 100,
                ..
            }) => {}
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
        assert_eq!(
            chars_used(&conn, user_id, "2026-08-06").expect("used failed"),
            900,
            "a rejected charge must not consume budget"
        );
    }

    #[test]
    fn days_are_independent_and_prunable() {
        let conn = setup_conn();
        let user_id = seed_user(&conn);

        charge(&conn, user_id, "2026-08-05", 500, 1_000).expect("charge failed");
        charge(&conn, user_id, "2026-08-06", 100, 1_000).expect("charge failed");
        assert_eq!(
            remaining(&conn, user_id, "2026-08-06", 1_000).expect("remaining failed"),
            900
        );

        let pruned = prune_before(&conn, "2026-08-06").expect("prune failed");
        assert_eq!(pruned, 1);
        assert_eq!(
            chars_used(&conn, user_id, "2026-08-05").expect("used failed"),
            0
        );
    }
}
