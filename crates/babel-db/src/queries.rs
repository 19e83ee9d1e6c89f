use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, params};
use uuid::Uuid;

use babel_types::events::ChangeEvent;
use babel_types::models::{Group, Message, NewMessage, Presence};

use crate::Database;
use crate::models::{GroupRow, MessageRow, PresenceRow, format_timestamp};

const MESSAGE_COLUMNS: &str =
    "id, group_id, username, original_text, translated_texts, language, message_type, created_at";

impl Database {
    // -- Groups --

    pub fn find_group_by_name(&self, name: &str) -> Result<Option<Group>> {
        self.with_conn(|conn| query_group_by_name(conn, name))
    }

    /// Create a group, or return the existing one if another client won the race.
    pub fn create_group(&self, name: &str) -> Result<Group> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO chat_groups (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![Uuid::new_v4().to_string(), name, format_timestamp(Utc::now())],
            )?;
            query_group_by_name(conn, name)?.ok_or_else(|| anyhow!("Group missing after insert: {}", name))
        })
    }

    // -- Messages --

    /// Insert a message. `id` and `created_at` are assigned here, at write time.
    pub fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        let id = Uuid::new_v4().to_string();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, group_id, username, original_text, translated_texts, language, message_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, '{}', ?5, ?6, ?7)",
                params![
                    id,
                    new.group_id.to_string(),
                    new.username,
                    new.original_text,
                    new.language,
                    new.message_type.as_str(),
                    format_timestamp(Utc::now()),
                ],
            )?;

            let message = query_message(conn, &id)?.ok_or_else(|| anyhow!("Message missing after insert: {}", id))?;
            self.feed().publish(ChangeEvent::MessageInsert(message.clone()));
            Ok(message)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Full history of a group, oldest first.
    pub fn get_messages(&self, group_id: &str) -> Result<Vec<Message>> {
        self.with_conn(|conn| query_messages(conn, group_id))
    }

    /// Union `translations` into the stored map inside one transaction.
    /// Existing languages not named in `translations` are kept.
    /// Returns `None` for unknown message ids.
    pub fn merge_translations(
        &self,
        id: &str,
        translations: &BTreeMap<String, String>,
    ) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let Some(mut message) = query_message(&tx, id)? else {
                return Ok(None);
            };

            message
                .translated_texts
                .extend(translations.iter().map(|(lang, text)| (lang.clone(), text.clone())));

            tx.execute(
                "UPDATE messages SET translated_texts = ?1 WHERE id = ?2",
                params![serde_json::to_string(&message.translated_texts)?, id],
            )?;
            tx.commit()?;

            self.feed().publish(ChangeEvent::MessageUpdate(message.clone()));
            Ok(Some(message))
        })
    }

    // -- Presence --

    /// Mark a user online in a group. A second join overwrites the row.
    pub fn upsert_presence(&self, group_id: &str, username: &str, language: &str) -> Result<Presence> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_presence (group_id, username, language, is_online, last_seen)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT(group_id, username) DO UPDATE SET
                    language = excluded.language,
                    is_online = 1,
                    last_seen = excluded.last_seen",
                params![group_id, username, language, format_timestamp(Utc::now())],
            )?;

            let presence = query_presence(conn, group_id, username)?
                .ok_or_else(|| anyhow!("Presence missing after upsert: {}/{}", group_id, username))?;
            self.feed().publish(ChangeEvent::PresenceChange(presence.clone()));
            Ok(presence)
        })
    }

    /// Refresh `last_seen`. Returns `None` if the user never joined.
    pub fn touch_presence(&self, group_id: &str, username: &str) -> Result<Option<Presence>> {
        self.update_presence(
            "UPDATE user_presence SET last_seen = ?1 WHERE group_id = ?2 AND username = ?3",
            group_id,
            username,
        )
    }

    pub fn set_offline(&self, group_id: &str, username: &str) -> Result<Option<Presence>> {
        self.update_presence(
            "UPDATE user_presence SET is_online = 0, last_seen = ?1 WHERE group_id = ?2 AND username = ?3",
            group_id,
            username,
        )
    }

    /// Online users in a group, sorted by username.
    pub fn get_online_presence(&self, group_id: &str) -> Result<Vec<Presence>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT group_id, username, language, is_online, last_seen
                 FROM user_presence
                 WHERE group_id = ?1 AND is_online = 1
                 ORDER BY username",
            )?;

            let rows = stmt
                .query_map([group_id], presence_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(Presence::try_from).collect()
        })
    }

    fn update_presence(&self, sql: &str, group_id: &str, username: &str) -> Result<Option<Presence>> {
        self.with_conn(|conn| {
            let changed = conn.execute(sql, params![format_timestamp(Utc::now()), group_id, username])?;
            if changed == 0 {
                return Ok(None);
            }

            let presence = query_presence(conn, group_id, username)?;
            if let Some(p) = &presence {
                self.feed().publish(ChangeEvent::PresenceChange(p.clone()));
            }
            Ok(presence)
        })
    }
}

fn query_group_by_name(conn: &Connection, name: &str) -> Result<Option<Group>> {
    let row = conn
        .query_row(
            "SELECT id, name, created_at FROM chat_groups WHERE name = ?1",
            [name],
            |row| {
                Ok(GroupRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        )
        .optional()?;

    row.map(Group::try_from).transpose()
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<Message>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
            [id],
            message_row,
        )
        .optional()?;

    row.map(Message::try_from).transpose()
}

fn query_messages(conn: &Connection, group_id: &str) -> Result<Vec<Message>> {
    // rowid breaks ties between writes in the same microsecond
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM messages WHERE group_id = ?1 ORDER BY created_at ASC, rowid ASC",
        MESSAGE_COLUMNS
    ))?;

    let rows = stmt
        .query_map([group_id], message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(Message::try_from).collect()
}

fn query_presence(conn: &Connection, group_id: &str, username: &str) -> Result<Option<Presence>> {
    let row = conn
        .query_row(
            "SELECT group_id, username, language, is_online, last_seen
             FROM user_presence WHERE group_id = ?1 AND username = ?2",
            [group_id, username],
            presence_row,
        )
        .optional()?;

    row.map(Presence::try_from).transpose()
}

fn message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        group_id: row.get(1)?,
        username: row.get(2)?,
        original_text: row.get(3)?,
        translated_texts: row.get(4)?,
        language: row.get(5)?,
        message_type: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn presence_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PresenceRow> {
    Ok(PresenceRow {
        group_id: row.get(0)?,
        username: row.get(1)?,
        language: row.get(2)?,
        is_online: row.get(3)?,
        last_seen: row.get(4)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
