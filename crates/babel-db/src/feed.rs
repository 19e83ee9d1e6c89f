use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use uuid::Uuid;

use babel_types::events::ChangeEvent;

pub use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Events buffered per group before a slow subscriber starts lagging.
pub const FEED_CAPACITY: usize = 1024;

/// Fans out row changes to every subscriber of a group, in commit order.
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<ChangeFeedInner>,
}

struct ChangeFeedInner {
    /// One channel per group so a busy group cannot push a quiet one into lag
    groups: Mutex<HashMap<Uuid, broadcast::Sender<ChangeEvent>>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ChangeFeedInner {
                groups: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to changes for a single group.
    pub fn subscribe(&self, group_id: Uuid) -> GroupSubscription {
        let rx = self
            .groups()
            .entry(group_id)
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe();

        GroupSubscription { group_id, rx }
    }

    /// Publish a change. Having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        let group_id = event.group_id();
        let mut groups = self.groups();

        if let Some(tx) = groups.get(&group_id) {
            if tx.send(event).is_err() {
                // Last subscriber went away
                groups.remove(&group_id);
            }
        }
    }

    fn groups(&self) -> MutexGuard<'_, HashMap<Uuid, broadcast::Sender<ChangeEvent>>> {
        // The map stays consistent even if a holder panicked
        self.inner.groups.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver half of the feed for one group.
pub struct GroupSubscription {
    group_id: Uuid,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl GroupSubscription {
    pub fn group_id(&self) -> Uuid {
        self.group_id
    }

    /// Wait for the next event in this group.
    ///
    /// `Err(RecvError::Lagged(n))` means `n` events were dropped because this
    /// subscriber fell behind; the caller must reload to catch up.
    pub async fn recv(&mut self) -> Result<ChangeEvent, RecvError> {
        self.rx.recv().await
    }

    /// Next already-delivered event in this group, without waiting.
    pub fn try_recv(&mut self) -> Result<ChangeEvent, TryRecvError> {
        self.rx.try_recv()
    }
}
