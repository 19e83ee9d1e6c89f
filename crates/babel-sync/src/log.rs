//! Local message log reconciliation.
//!
//! The log is an append-only sequence keyed by message id. Inserts that are
//! already present (the sender's optimistic copy racing its own echo, or a
//! redelivery) are dropped; updates replace in place.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use babel_types::events::ChangeEvent;
use babel_types::models::Message;

/// What one client currently knows about a group's messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncView {
    /// Ascending by `created_at`; never re-sorted after the initial load.
    pub messages: Vec<Message>,
    /// Messages someone else is expected to be translating for this viewer.
    pub translating: HashSet<Uuid>,
}

impl SyncView {
    pub fn from_history(messages: Vec<Message>) -> Self {
        Self {
            messages,
            translating: HashSet::new(),
        }
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }
}

/// The local participant the view belongs to.
#[derive(Debug, Clone, Copy)]
pub struct Viewer<'a> {
    pub group_id: Uuid,
    pub username: &'a str,
    pub language: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New message appended to the end of the log.
    Appended { translating: bool },
    /// Insert for an id already in the log.
    Duplicate,
    /// Stored copy replaced; `translation_done` if new languages arrived.
    Replaced { translation_done: bool },
    /// Update for an id this client never saw.
    UnknownMessage,
    /// Event scoped to a different group.
    ForeignGroup,
    /// Not a message event.
    Ignored,
    /// Feed events were lost and the log was rebuilt from the store;
    /// `recovered` messages were missing locally.
    Resynced { recovered: usize },
    /// A fan-out ended without merging anything, so no update will clear
    /// the message's marker.
    TranslationAbandoned(Uuid),
}

/// Append a message this client just wrote. Idempotent by id.
pub fn append_local(mut view: SyncView, message: Message) -> SyncView {
    if !view.contains(message.id) {
        view.messages.push(message);
    }
    view
}

/// Fold one change-feed event into the view.
pub fn merge(mut view: SyncView, event: &ChangeEvent, viewer: &Viewer<'_>) -> (SyncView, MergeOutcome) {
    if event.group_id() != viewer.group_id {
        return (view, MergeOutcome::ForeignGroup);
    }

    let outcome = match event {
        ChangeEvent::MessageInsert(message) => {
            if view.contains(message.id) {
                MergeOutcome::Duplicate
            } else {
                let translating = message.awaits_translation_for(viewer.username, viewer.language);
                if translating {
                    view.translating.insert(message.id);
                }
                view.messages.push(message.clone());
                MergeOutcome::Appended { translating }
            }
        }
        ChangeEvent::MessageUpdate(updated) => {
            match view.messages.iter_mut().find(|m| m.id == updated.id) {
                Some(stored) => {
                    let translation_done = updated
                        .translated_texts
                        .keys()
                        .any(|lang| !stored.translated_texts.contains_key(lang));

                    // Keep anything we already had that this update lacks
                    let mut merged = updated.clone();
                    for (lang, text) in &stored.translated_texts {
                        merged
                            .translated_texts
                            .entry(lang.clone())
                            .or_insert_with(|| text.clone());
                    }
                    *stored = merged;

                    if translation_done {
                        view.translating.remove(&updated.id);
                    }
                    MergeOutcome::Replaced { translation_done }
                }
                None => MergeOutcome::UnknownMessage,
            }
        }
        ChangeEvent::PresenceChange(_) => MergeOutcome::Ignored,
    };

    (view, outcome)
}

/// Rebuild the view from the store's history after feed events were lost.
///
/// History is authoritative for membership and order. Translations already
/// held locally are unioned into the reloaded copies. A marker survives only
/// while its message has gained no new language; recovered messages are
/// marked the way an insert would mark them. Returns the number of messages
/// that were missing locally.
pub fn resync(view: SyncView, history: Vec<Message>, viewer: &Viewer<'_>) -> (SyncView, usize) {
    let was_translating = view.translating;
    let known: HashMap<Uuid, Message> = view.messages.into_iter().map(|m| (m.id, m)).collect();

    let mut rebuilt = SyncView::default();
    let mut recovered = 0;

    for mut message in history {
        if message.group_id != viewer.group_id {
            continue;
        }

        match known.get(&message.id) {
            Some(local) => {
                let gained = message
                    .translated_texts
                    .keys()
                    .any(|lang| !local.translated_texts.contains_key(lang));
                for (lang, text) in &local.translated_texts {
                    message
                        .translated_texts
                        .entry(lang.clone())
                        .or_insert_with(|| text.clone());
                }
                if was_translating.contains(&message.id) && !gained {
                    rebuilt.translating.insert(message.id);
                }
            }
            None => {
                recovered += 1;
                if message.awaits_translation_for(viewer.username, viewer.language)
                    && !message.translated_texts.contains_key(viewer.language)
                {
                    rebuilt.translating.insert(message.id);
                }
            }
        }

        rebuilt.messages.push(message);
    }

    (rebuilt, recovered)
}
