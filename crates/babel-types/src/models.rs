use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author name reserved for synthetic join/leave notices.
pub const SYSTEM_USERNAME: &str = "System";

/// Language that system notices are authored in.
pub const SYSTEM_LANGUAGE: &str = "en";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    User,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "system" => Ok(Self::System),
            other => Err(format!("unknown message type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A chat message as stored by the remote store.
///
/// `original_text`, `language` and `group_id` never change after creation.
/// `translated_texts` only ever gains entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub group_id: Uuid,
    pub username: String,
    pub original_text: String,
    #[serde(default)]
    pub translated_texts: BTreeMap<String, String>,
    pub language: String,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_system(&self) -> bool {
        self.message_type == MessageType::System
    }

    /// Text a viewer reading in `viewer_language` should see.
    /// System messages and same-language messages always show the original.
    pub fn display_text(&self, viewer_language: &str) -> &str {
        if self.is_system() || self.language == viewer_language {
            return &self.original_text;
        }
        self.translated_texts
            .get(viewer_language)
            .map(String::as_str)
            .unwrap_or(&self.original_text)
    }

    /// Whether a viewer has to wait on someone else's fan-out to read this message.
    pub fn awaits_translation_for(&self, viewer_username: &str, viewer_language: &str) -> bool {
        self.message_type == MessageType::User
            && self.username != viewer_username
            && self.language != viewer_language
    }
}

/// Fields a client supplies when writing a message. The store assigns
/// `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub group_id: Uuid,
    pub username: String,
    pub original_text: String,
    pub language: String,
    pub message_type: MessageType,
}

impl NewMessage {
    pub fn user(group_id: Uuid, username: &str, text: &str, language: &str) -> Self {
        Self {
            group_id,
            username: username.to_string(),
            original_text: text.to_string(),
            language: language.to_string(),
            message_type: MessageType::User,
        }
    }

    pub fn joined(group_id: Uuid, username: &str) -> Self {
        Self::system(group_id, format!("{} joined the chat", username))
    }

    pub fn left(group_id: Uuid, username: &str) -> Self {
        Self::system(group_id, format!("{} left the chat", username))
    }

    fn system(group_id: Uuid, text: String) -> Self {
        Self {
            group_id,
            username: SYSTEM_USERNAME.to_string(),
            original_text: text,
            language: SYSTEM_LANGUAGE.to_string(),
            message_type: MessageType::System,
        }
    }
}

/// One row per (group, username).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub group_id: Uuid,
    pub username: String,
    pub language: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(message_type: MessageType, language: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            username: "asha".into(),
            original_text: "namaste".into(),
            translated_texts: BTreeMap::from([("fr".to_string(), "bonjour".to_string())]),
            language: language.into(),
            message_type,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn display_text_prefers_viewer_translation() {
        let msg = message(MessageType::User, "hi");
        assert_eq!(msg.display_text("fr"), "bonjour");
        assert_eq!(msg.display_text("hi"), "namaste");
        // No translation yet for German viewers
        assert_eq!(msg.display_text("de"), "namaste");
    }

    #[test]
    fn system_messages_always_show_original() {
        let msg = message(MessageType::System, "en");
        assert_eq!(msg.display_text("fr"), "namaste");
        assert!(!msg.awaits_translation_for("bob", "fr"));
    }

    #[test]
    fn message_type_wire_format_is_lowercase() {
        let json = serde_json::to_string(&MessageType::System).unwrap();
        assert_eq!(json, "\"system\"");
        assert_eq!("user".parse::<MessageType>(), Ok(MessageType::User));
        assert!("bot".parse::<MessageType>().is_err());
    }

    #[test]
    fn system_notices_use_reserved_author() {
        let group_id = Uuid::new_v4();
        let notice = NewMessage::joined(group_id, "asha");
        assert_eq!(notice.username, SYSTEM_USERNAME);
        assert_eq!(notice.original_text, "asha joined the chat");
        assert_eq!(notice.message_type, MessageType::System);
        assert_eq!(NewMessage::left(group_id, "asha").original_text, "asha left the chat");
    }
}
