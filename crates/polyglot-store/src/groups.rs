//! Chat groups and membership.

use crate::StoreError;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

/// A chat group.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatGroup {
    /// Internal database ID.
    pub id: i64,
    /// Unique public ID for the group (UUID).
    pub group_id: String,
    /// Display name of the group.
    pub name: String,
    /// User who created the group.
    pub owner_id: i64,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
}

/// A group membership entry.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMember {
    pub user_id: i64,
    pub joined_at: String,
}

fn map_row_to_group(row: &Row<'_>) -> rusqlite::Result<ChatGroup> {
    Ok(ChatGroup {
        id: row.get(0)?,
        group_id: row.get(1)?,
        name: row.get(2)?,
        owner_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

const GROUP_COLUMNS: &str = "id, group_id, name, owner_id, created_at";

/// Creates a new group with a fresh public ID; the owner becomes the first
/// member.
pub fn create_group(conn: &Connection, name: &str, owner_id: i64) -> Result<ChatGroup, StoreError> {
    let group_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO chat_groups (group_id, name, owner_id) VALUES (?1, ?2, ?3)",
        params![group_id, name, owner_id],
    )?;
    let id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO group_members (group_id, user_id) VALUES (?1, ?2)",
        params![id, owner_id],
    )?;
    get_group(conn, &group_id)
}

/// Retrieves a group by its public ID.
pub fn get_group(conn: &Connection, group_id: &str) -> Result<ChatGroup, StoreError> {
    conn.query_row(
        &format!("SELECT {GROUP_COLUMNS} FROM chat_groups WHERE group_id = ?1"),
        [group_id],
        map_row_to_group,
    )
    .optional()?
    .ok_or_else(|| StoreError::GroupNotFound(group_id.to_string()))
}

/// Adds a user to a group. Adding an existing member is a no-op.
pub fn add_member(conn: &Connection, group: &ChatGroup, user_id: i64) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
        params![group.id, user_id],
    )?;
    Ok(())
}

/// Removes a user from a group. Removing a non-member is a no-op.
pub fn remove_member(conn: &Connection, group: &ChatGroup, user_id: i64) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
        params![group.id, user_id],
    )?;
    Ok(())
}

/// Whether a user belongs to a group.
pub fn is_member(conn: &Connection, group: &ChatGroup, user_id: i64) -> Result<bool, StoreError> {
    let member: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2)",
        params![group.id, user_id],
        |row| row.get(0),
    )?;
    Ok(member)
}

/// Lists members of a group in join order.
pub fn list_members(conn: &Connection, group: &ChatGroup) -> Result<Vec<GroupMember>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT user_id, joined_at FROM group_members WHERE group_id = ?1 ORDER BY joined_at ASC, user_id ASC",
    )?;
    let rows = stmt.query_map([group.id], |row| {
        Ok(GroupMember {
            user_id: row.get(0)?,
            joined_at: row.get(1)?,
        })
    })?;
    let mut members = Vec::new();
    for row in rows {
        members.push(row?);
    }
    Ok(members)
}

/// Lists all groups a user belongs to, newest first.
pub fn list_groups_for_user(conn: &Connection, user_id: i64) -> Result<Vec<ChatGroup>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {GROUP_COLUMNS} FROM chat_groups
         WHERE id IN (SELECT group_id FROM group_members WHERE user_id = ?1)
         ORDER BY id DESC"
    ))?;
    let rows = stmt.query_map([user_id], map_row_to_group)?;
    let mut groups = Vec::new();
    for row in rows {
        groups.push(row?);
    }
    Ok(groups)
}

/// Deletes a group; memberships and messages cascade.
pub fn delete_group(conn: &Connection, group_id: &str) -> Result<(), StoreError> {
    let deleted = conn.execute("DELETE FROM chat_groups WHERE group_id = ?1", [group_id])?;
    if deleted == 0 {
        return Err(StoreError::GroupNotFound(group_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_conn;
    use crate::users::{create_user, CreateUserParams};

    fn seed_user(conn: &Connection, username: &str) -> i64 {
        create_user(
            conn,
            &CreateUserParams {
                username: username.to_string(),
                display_name: username.to_string(),
                preferred_language: "en".to_string(),
            },
        )
        .expect("create user failed")
        .id
    }

    #[test]
    fn group_membership_round_trip() {
        let conn = setup_conn();
        let owner = seed_user(&conn, "owner");
        let friend = seed_user(&conn, "friend");

        let group = create_group(&conn, "Language exchange", owner).expect("create group failed");
        assert!(is_member(&conn, &group, owner).expect("is_member failed"));

        add_member(&conn, &group, friend).expect("add member failed");
        add_member(&conn, &group, friend).expect("repeat add should be a no-op");
        let members = list_members(&conn, &group).expect("list members failed");
        assert_eq!(members.len(), 2);

        assert_eq!(
            list_groups_for_user(&conn, friend).expect("list groups failed"),
            vec![group.clone()]
        );

        remove_member(&conn, &group, friend).expect("remove member failed");
        assert!(!is_member(&conn, &group, friend).expect("is_member failed"));

        delete_group(&conn, &group.group_id).expect("delete group failed");
        match get_group(&conn, &group.group_id) {
            Err(StoreError::GroupNotFound(_)) => {}
            other => panic!("expected GroupNotFound, got {other:?}"),
        }
    }

    #[test]
    fn deleting_a_user_cascades_membership() {
        let conn = setup_conn();
        let owner = seed_user(&conn, "owner");
        let member = seed_user(&conn, "member");
        let group = create_group(&conn, "Cascade check", owner).expect("create group failed");
        add_member(&conn, &group, member).expect("add member failed");

        crate::users::delete_user(&conn, member).expect("delete user failed");
        assert!(!is_member(&conn, &group, member).expect("is_member failed"));
    }
}
