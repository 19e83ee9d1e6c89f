//! Database row types. These map directly to SQLite rows and are converted
//! into babel-types models at the edge of this crate.

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use uuid::Uuid;

use babel_types::models::{Group, Message, MessageType, Presence};

pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub group_id: String,
    pub username: String,
    pub original_text: String,
    pub translated_texts: String,
    pub language: String,
    pub message_type: String,
    pub created_at: String,
}

pub struct PresenceRow {
    pub group_id: String,
    pub username: String,
    pub language: String,
    pub is_online: bool,
    pub last_seen: String,
}

impl TryFrom<GroupRow> for Group {
    type Error = anyhow::Error;

    fn try_from(row: GroupRow) -> Result<Self> {
        Ok(Group {
            id: parse_id(&row.id)?,
            created_at: parse_timestamp(&row.created_at)?,
            name: row.name,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let translated_texts: BTreeMap<String, String> = serde_json::from_str(&row.translated_texts)
            .with_context(|| format!("Corrupt translated_texts on message '{}'", row.id))?;
        let message_type: MessageType = row.message_type.parse().map_err(|e| anyhow!("{}", e))?;

        Ok(Message {
            id: parse_id(&row.id)?,
            group_id: parse_id(&row.group_id)?,
            created_at: parse_timestamp(&row.created_at)?,
            username: row.username,
            original_text: row.original_text,
            translated_texts,
            language: row.language,
            message_type,
        })
    }
}

impl TryFrom<PresenceRow> for Presence {
    type Error = anyhow::Error;

    fn try_from(row: PresenceRow) -> Result<Self> {
        Ok(Presence {
            group_id: parse_id(&row.group_id)?,
            last_seen: parse_timestamp(&row.last_seen)?,
            username: row.username,
            language: row.language,
            is_online: row.is_online,
        })
    }
}

/// Fixed-width UTC timestamps, so lexical order in SQLite equals time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by SQLite's datetime('now') carry no timezone
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().map_err(|e| anyhow!("Corrupt id '{}': {}", raw, e))
}
