//! Message persistence, translations, and history retrieval.

use crate::{MessageKind, StoreError};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

/// A stored chat message in its original language.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Internal database ID; also the history cursor.
    pub id: i64,
    /// Unique public ID for the message (UUID).
    pub message_id: String,
    /// Internal ID of the group this message belongs to.
    pub group_id: i64,
    /// Internal ID of the sender.
    pub sender_id: i64,
    /// Kind of message.
    pub kind: MessageKind,
    /// Body in the source language.
    pub body: String,
    /// Language the sender wrote in.
    pub source_language: String,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
}

/// A rendered translation of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub language: String,
    pub body: String,
    pub translated_at: String,
}

/// Parameters for storing a new message.
#[derive(Debug, Clone)]
pub struct CreateMessageParams {
    pub group_id: i64,
    pub sender_id: i64,
    pub kind: MessageKind,
    pub body: String,
    pub source_language: String,
}

fn map_row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let kind_json: String = row.get(4)?;
    let kind = serde_json::from_str(&kind_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Message {
        id: row.get(0)?,
        message_id: row.get(1)?,
        group_id: row.get(2)?,
        sender_id: row.get(3)?,
        kind,
        body: row.get(5)?,
        source_language: row.get(6)?,
        created_at: row.get(7)?,
    })
}

const MESSAGE_COLUMNS: &str =
    "id, message_id, group_id, sender_id, kind, body, source_language, created_at";

/// Stores a new message with a fresh public ID and returns the stored row.
pub fn create_message(
    conn: &Connection,
    params: &CreateMessageParams,
) -> Result<Message, StoreError> {
    let message_id = Uuid::new_v4().to_string();
    let kind_json = serde_json::to_string(&params.kind)?;
    conn.execute(
        "INSERT INTO messages (message_id, group_id, sender_id, kind, body, source_language)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            message_id,
            params.group_id,
            params.sender_id,
            kind_json,
            params.body,
            params.source_language,
        ],
    )?;
    get_message(conn, &message_id)
}

/// Retrieves a message by its public ID.
pub fn get_message(conn: &Connection, message_id: &str) -> Result<Message, StoreError> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1"),
        [message_id],
        map_row_to_message,
    )
    .optional()?
    .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))
}

/// Stores (or refreshes) one translation of a message.
pub fn add_translation(
    conn: &Connection,
    message: &Message,
    language: &str,
    body: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO message_translations (message_id, language, body) VALUES (?1, ?2, ?3)
         ON CONFLICT (message_id, language)
         DO UPDATE SET body = excluded.body, translated_at = datetime('now')",
        params![message.id, language, body],
    )?;
    Ok(())
}

/// All translations rendered for a message so far.
pub fn translations_for(conn: &Connection, message: &Message) -> Result<Vec<Translation>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT language, body, translated_at FROM message_translations
         WHERE message_id = ?1 ORDER BY language ASC",
    )?;
    let rows = stmt.query_map([message.id], |row| {
        Ok(Translation {
            language: row.get(0)?,
            body: row.get(1)?,
            translated_at: row.get(2)?,
        })
    })?;
    let mut translations = Vec::new();
    for row in rows {
        translations.push(row?);
    }
    Ok(translations)
}

/// The body of a message in the given language, falling back to the
/// original when no translation has been rendered yet.
pub fn body_in_language(
    conn: &Connection,
    message: &Message,
    language: &str,
) -> Result<String, StoreError> {
    if language == message.source_language {
        return Ok(message.body.clone());
    }
    let translated: Option<String> = conn
        .query_row(
            "SELECT body FROM message_translations WHERE message_id = ?1 AND language = ?2",
            params![message.id, language],
            |row| row.get(0),
        )
        .optional()?;
    Ok(translated.unwrap_or_else(|| message.body.clone()))
}

/// Lists messages in a group, newest first. `before` is an exclusive
/// cursor (a message `id` from a previous page); `limit` caps the page.
pub fn list_group_messages(
    conn: &Connection,
    group_id: i64,
    limit: usize,
    before: Option<i64>,
) -> Result<Vec<Message>, StoreError> {
    let cursor = before.unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE group_id = ?1 AND id < ?2
         ORDER BY id DESC LIMIT ?3"
    ))?;
    let rows = stmt.query_map(params![group_id, cursor, limit as i64], map_row_to_message)?;
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

/// Deletes messages older than `days`, at most `limit` per call.
///
/// Retention sweeps call this in a loop until it returns less than `limit`,
/// keeping each delete transaction short.
pub fn delete_messages_older_than(
    conn: &Connection,
    days: u32,
    limit: usize,
) -> Result<usize, StoreError> {
    let deleted = conn.execute(
        "DELETE FROM messages WHERE id IN (
            SELECT id FROM messages
            WHERE created_at < datetime('now', ?1)
            LIMIT ?2
        )",
        params![format!("-{days} days"), limit as i64],
    )?;
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::create_group;
    use crate::test_support::setup_conn;
    use crate::users::{create_user, CreateUserParams};

    fn seed(conn: &Connection) -> (i64, i64) {
        let user = create_user(
            conn,
            &CreateUserParams {
                username: "sender".to_string(),
                display_name: "Sender".to_string(),
                preferred_language: "en".to_string(),
            },
        )
        .expect("create user failed");
        let group = create_group(conn, "General", user.id).expect("create group failed");
        (group.id, user.id)
    }

    fn text_message(group_id: i64, sender_id: i64, body: &str) -> CreateMessageParams {
        CreateMessageParams {
            group_id,
            sender_id,
            kind: MessageKind::Text,
            body: body.to_string(),
            source_language: "en".to_string(),
        }
    }

    #[test]
    fn message_and_translation_round_trip() {
        let conn = setup_conn();
        let (group_id, sender_id) = seed(&conn);

        let message = create_message(&conn, &text_message(group_id, sender_id, "Good morning"))
            .expect("create message failed");
        assert_eq!(message.kind, MessageKind::Text);

        add_translation(&conn, &message, "es", "Buenos días").expect("add translation failed");
        add_translation(&conn, &message, "fr", "Bonjour").expect("add translation failed");
        // refreshed translation replaces the old body
        add_translation(&conn, &message, "es", "Buen día").expect("refresh translation failed");

        let translations = translations_for(&conn, &message).expect("translations failed");
        assert_eq!(translations.len(), 2);
        assert_eq!(translations[0].language, "es");
        assert_eq!(translations[0].body, "Buen día");

        assert_eq!(
            body_in_language(&conn, &message, "fr").expect("lookup failed"),
            "Bonjour"
        );
        assert_eq!(
            body_in_language(&conn, &message, "en").expect("lookup failed"),
            "Good morning"
        );
        // untranslated language falls back to the original
        assert_eq!(
            body_in_language(&conn, &message, "ja").expect("lookup failed"),
            "Good morning"
        );
    }

    #[test]
    fn history_pages_newest_first() {
        let conn = setup_conn();
        let (group_id, sender_id) = seed(&conn);

        for n in 0..5 {
            create_message(&conn, &text_message(group_id, sender_id, &format!("m{n}")))
                .expect("create message failed");
        }

        let first_page =
            list_group_messages(&conn, group_id, 2, None).expect("list messages failed");
        assert_eq!(first_page.len(), 2);
        assert_eq!(first_page[0].body, "m4");
        assert_eq!(first_page[1].body, "m3");

        let second_page = list_group_messages(&conn, group_id, 2, Some(first_page[1].id))
            .expect("list messages failed");
        assert_eq!(second_page.len(), 2);
        assert_eq!(second_page[0].body, "m2");
        assert_eq!(second_page[1].body, "m1");
    }

    #[test]
    fn retention_sweep_deletes_only_old_messages() {
        let conn = setup_conn();
        let (group_id, sender_id) = seed(&conn);

        let old = create_message(&conn, &text_message(group_id, sender_id, "ancient"))
            .expect("create message failed");
        conn.execute(
            "UPDATE messages SET created_at = datetime('now', '-40 days') WHERE id = ?1",
            [old.id],
        )
        .expect("backdate failed");
        create_message(&conn, &text_message(group_id, sender_id, "fresh"))
            .expect("create message failed");

        let deleted = delete_messages_older_than(&conn, 30, 100).expect("sweep failed");
        assert_eq!(deleted, 1);

        let remaining = list_group_messages(&conn, group_id, 10, None).expect("list failed");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].body, "fresh");
    }
}
