use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Presence};

/// Row changes pushed over the change feed, in commit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChangeEvent {
    /// A message row was created
    MessageInsert(Message),

    /// A message row was updated (translations merged in)
    MessageUpdate(Message),

    /// A presence row was upserted, refreshed or flipped offline
    PresenceChange(Presence),
}

impl ChangeEvent {
    /// Every change is scoped to exactly one group.
    pub fn group_id(&self) -> Uuid {
        match self {
            Self::MessageInsert(m) | Self::MessageUpdate(m) => m.group_id,
            Self::PresenceChange(p) => p.group_id,
        }
    }
}
