use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use babel_types::models::Presence;

use crate::error::{StoreError, SyncError};
use crate::store::RemoteStore;

/// How often a joined client refreshes `last_seen`.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Keeps the local user's presence row current.
///
/// Rows left online by clients that never sent a clean leave are not reaped
/// here; they stay visible until something else corrects them.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn RemoteStore>,
    username: String,
    language: String,
    interval: Duration,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn RemoteStore>, username: &str, language: &str) -> Self {
        Self {
            store,
            username: username.to_string(),
            language: language.to_string(),
            interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.set_interval(interval);
        self
    }

    /// Applies to heartbeats spawned after the call.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Upsert an online row stamped now.
    pub async fn join(&self, group_id: Uuid) -> Result<Presence, SyncError> {
        self.store
            .upsert_presence(group_id, &self.username, &self.language)
            .await
            .map_err(SyncError::PresenceWrite)
    }

    pub async fn heartbeat(&self, group_id: Uuid) -> Result<(), SyncError> {
        self.store
            .touch_presence(group_id, &self.username)
            .await
            .map_err(SyncError::PresenceWrite)
    }

    pub async fn leave(&self, group_id: Uuid) -> Result<(), SyncError> {
        self.store
            .set_offline(group_id, &self.username)
            .await
            .map_err(SyncError::PresenceWrite)
    }

    /// Online users in `group_id`, sorted by username.
    pub async fn online(&self, group_id: Uuid) -> Result<Vec<Presence>, StoreError> {
        self.store.online_presence(group_id).await
    }

    /// Refresh `last_seen` every interval until the handle is aborted.
    /// Failed refreshes are logged and retried on the next tick.
    pub fn spawn_heartbeat(&self, group_id: Uuid) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + tracker.interval, tracker.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match tracker.heartbeat(group_id).await {
                    Ok(()) => debug!("Heartbeat for {} in {}", tracker.username, group_id),
                    Err(e) => warn!("Heartbeat for {} in {} failed: {}", tracker.username, group_id, e),
                }
            }
        })
    }
}

/// Fold a presence row from the change feed into a local online list,
/// keeping it sorted by username.
pub fn apply_presence_change(mut online: Vec<Presence>, row: Presence) -> Vec<Presence> {
    let position = online.binary_search_by(|p| p.username.as_str().cmp(row.username.as_str()));

    match (position, row.is_online) {
        (Ok(i), true) => online[i] = row,
        (Ok(i), false) => {
            online.remove(i);
        }
        (Err(i), true) => online.insert(i, row),
        (Err(_), false) => {}
    }

    online
}
