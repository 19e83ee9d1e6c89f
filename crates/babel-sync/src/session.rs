use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use babel_types::events::ChangeEvent;
use babel_types::models::{Group, Message, NewMessage, Presence};

use crate::dispatcher::{TranslationDispatcher, plan_targets};
use crate::error::SyncError;
use crate::log::{self, MergeOutcome, SyncView, Viewer};
use crate::oracle::TranslationOracle;
use crate::presence::{PresenceTracker, apply_presence_change};
use crate::store::{ChangeStream, FeedItem, RemoteStore};

/// Who the local participant is.
#[derive(Debug, Clone)]
pub struct Identity {
    pub username: String,
    pub language: String,
}

impl Identity {
    pub fn new(username: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            language: language.into(),
        }
    }
}

/// Result of a background fan-out, reported back to the session.
#[derive(Debug)]
struct TranslationEnded {
    message_id: Uuid,
    merged: bool,
}

/// One client's session in one group.
///
/// Calls are processed one at a time: the owner invokes `join`/`send`/`leave`
/// and pumps `next_remote_change`, and no other task touches the view.
/// Translation fan-outs run on their own tasks and report back through the
/// same pump.
pub struct ChatSession {
    identity: Identity,
    store: Arc<dyn RemoteStore>,
    dispatcher: TranslationDispatcher,
    presence: PresenceTracker,

    view: SyncView,
    online: Vec<Presence>,
    group_id: Option<Uuid>,
    loading: bool,

    feed: Option<ChangeStream>,
    heartbeat: Option<JoinHandle<()>>,

    translations_tx: mpsc::UnboundedSender<TranslationEnded>,
    translations_rx: mpsc::UnboundedReceiver<TranslationEnded>,
}

impl ChatSession {
    pub fn new(identity: Identity, store: Arc<dyn RemoteStore>, oracle: Arc<dyn TranslationOracle>) -> Self {
        let dispatcher = TranslationDispatcher::new(store.clone(), oracle);
        let presence = PresenceTracker::new(store.clone(), &identity.username, &identity.language);
        let (translations_tx, translations_rx) = mpsc::unbounded_channel();

        Self {
            identity,
            store,
            dispatcher,
            presence,
            view: SyncView::default(),
            online: Vec::new(),
            group_id: None,
            loading: false,
            feed: None,
            heartbeat: None,
            translations_tx,
            translations_rx,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.presence.set_interval(interval);
        self
    }

    // -- View --

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn group_id(&self) -> Option<Uuid> {
        self.group_id
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Messages in display order.
    pub fn messages(&self) -> &[Message] {
        &self.view.messages
    }

    /// Online users, sorted by username.
    pub fn online_users(&self) -> &[Presence] {
        &self.online
    }

    pub fn is_translating(&self, message_id: Uuid) -> bool {
        self.view.translating.contains(&message_id)
    }

    pub fn translating(&self) -> &HashSet<Uuid> {
        &self.view.translating
    }

    // -- Lifecycle --

    /// Join `group_name`, creating the group if needed.
    ///
    /// Only group resolution is fatal. The presence upsert and the join notice
    /// are independent writes; a failure in either is logged and the other
    /// still happens.
    pub async fn join(&mut self, group_name: &str) -> Result<Uuid, SyncError> {
        if self.group_id.is_some() {
            self.leave().await;
        }

        self.loading = true;
        let result = self.join_group(group_name).await;
        self.loading = false;
        result
    }

    async fn join_group(&mut self, group_name: &str) -> Result<Uuid, SyncError> {
        let group = self.resolve_group(group_name).await?;
        let group_id = group.id;

        // Subscribe before writing so nothing between history and feed is lost
        self.feed = Some(self.store.subscribe(group_id));
        self.group_id = Some(group_id);

        if let Err(e) = self.presence.join(group_id).await {
            warn!("{} joining {}: {}", self.identity.username, group_name, e);
        }

        if let Err(e) = self
            .store
            .insert_message(NewMessage::joined(group_id, &self.identity.username))
            .await
        {
            warn!("Join notice for {} in {} failed: {}", self.identity.username, group_name, e);
        }

        self.reload(group_id).await;
        self.heartbeat = Some(self.presence.spawn_heartbeat(group_id));

        info!(
            "{} ({}) joined group {} ({})",
            self.identity.username, self.identity.language, group_name, group_id
        );
        Ok(group_id)
    }

    async fn resolve_group(&self, group_name: &str) -> Result<Group, SyncError> {
        let resolution_error = |source| SyncError::GroupResolution {
            name: group_name.to_string(),
            source,
        };

        let group = match self.store.find_group(group_name).await.map_err(resolution_error)? {
            Some(group) => group,
            None => {
                debug!("Group {} not found, creating it", group_name);
                self.store.create_group(group_name).await.map_err(resolution_error)?
            }
        };

        Ok(group)
    }

    /// Load full history and the online list from the store.
    async fn reload(&mut self, group_id: Uuid) {
        match self.store.list_messages(group_id).await {
            Ok(messages) => self.view = SyncView::from_history(messages),
            Err(e) => {
                error!("Failed to load messages for {}: {}", group_id, e);
                self.view = SyncView::default();
            }
        }

        match self.presence.online(group_id).await {
            Ok(online) => self.online = online,
            Err(e) => warn!("Failed to load online users for {}: {}", group_id, e),
        }
    }

    /// Leave the current group. Never fails: leaving must always work.
    pub async fn leave(&mut self) {
        let Some(group_id) = self.group_id.take() else {
            return;
        };

        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
        self.feed = None;

        if let Err(e) = self.presence.leave(group_id).await {
            warn!("{} leaving {}: {}", self.identity.username, group_id, e);
        }

        if let Err(e) = self
            .store
            .insert_message(NewMessage::left(group_id, &self.identity.username))
            .await
        {
            warn!("Leave notice for {} in {} failed: {}", self.identity.username, group_id, e);
        }

        self.view = SyncView::default();
        self.online.clear();
        info!("{} left group {}", self.identity.username, group_id);
    }

    // -- Messaging --

    /// Send a message. Blank text is ignored and returns `Ok(None)`.
    ///
    /// The stored message is appended locally as soon as the write returns.
    /// Translation runs in the background; its failures are logged and never
    /// fail the send.
    pub async fn send(&mut self, text: &str) -> Result<Option<Message>, SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let group_id = self.group_id.ok_or(SyncError::NotJoined)?;

        let message = self
            .store
            .insert_message(NewMessage::user(
                group_id,
                &self.identity.username,
                text,
                &self.identity.language,
            ))
            .await
            .map_err(|e| {
                error!("Failed to send message in {}: {}", group_id, e);
                SyncError::MessageWrite(e)
            })?;

        self.view = log::append_local(std::mem::take(&mut self.view), message.clone());
        self.fan_out(&message).await;

        Ok(Some(message))
    }

    /// Mark `message` translating and hand it to the dispatcher on its own
    /// task. The outcome comes back through `next_remote_change`.
    async fn fan_out(&mut self, message: &Message) {
        let online = match self.presence.online(message.group_id).await {
            Ok(online) => online,
            Err(e) => {
                warn!("Skipping translation of {}, presence unavailable: {}", message.id, e);
                return;
            }
        };

        let Some(targets) = plan_targets(&online) else {
            debug!("Only one language online in {}, skipping translation", message.group_id);
            return;
        };

        self.view.translating.insert(message.id);

        let dispatcher = self.dispatcher.clone();
        let ended = self.translations_tx.clone();
        let message_id = message.id;
        tokio::spawn(async move {
            let merged = match dispatcher.dispatch(message_id, &targets).await {
                Ok(fan_out) => !fan_out.translations.is_empty(),
                Err(e) => {
                    warn!("Translation of {} failed: {}", message_id, e);
                    false
                }
            };
            // Nobody to tell if the session is gone
            let _ = ended.send(TranslationEnded { message_id, merged });
        });
    }

    fn end_translation(&mut self, ended: TranslationEnded) -> Option<MergeOutcome> {
        // A merged fan-out is finished by its update event
        if ended.merged || !self.view.translating.remove(&ended.message_id) {
            return None;
        }
        debug!("Translation of {} produced nothing", ended.message_id);
        Some(MergeOutcome::TranslationAbandoned(ended.message_id))
    }

    // -- Change feed --

    /// Fold one change-feed event into the local view.
    pub fn on_remote_change(&mut self, event: &ChangeEvent) -> MergeOutcome {
        let Some(group_id) = self.group_id else {
            return MergeOutcome::ForeignGroup;
        };

        if let ChangeEvent::PresenceChange(row) = event {
            if row.group_id != group_id {
                return MergeOutcome::ForeignGroup;
            }
            self.online = apply_presence_change(std::mem::take(&mut self.online), row.clone());
            return MergeOutcome::Ignored;
        }

        let viewer = Viewer {
            group_id,
            username: &self.identity.username,
            language: &self.identity.language,
        };
        let (view, outcome) = log::merge(std::mem::take(&mut self.view), event, &viewer);
        self.view = view;

        match outcome {
            MergeOutcome::Duplicate | MergeOutcome::UnknownMessage | MergeOutcome::ForeignGroup => {
                debug!("Feed anomaly {:?} for group {}", outcome, group_id);
            }
            _ => {}
        }
        outcome
    }

    /// Wait for the next feed item or finished translation and apply it.
    /// `None` when not joined or the feed has closed.
    pub async fn next_remote_change(&mut self) -> Option<MergeOutcome> {
        loop {
            let feed = self.feed.as_mut()?;
            let item = tokio::select! {
                Some(ended) = self.translations_rx.recv() => {
                    match self.end_translation(ended) {
                        Some(outcome) => return Some(outcome),
                        None => continue,
                    }
                }
                item = feed.next() => item?,
            };
            return Some(self.apply_feed_item(item).await);
        }
    }

    /// Apply every finished translation and feed item already delivered,
    /// without waiting for more.
    pub async fn drain_remote_changes(&mut self) -> Vec<MergeOutcome> {
        let mut outcomes = Vec::new();

        while let Ok(ended) = self.translations_rx.try_recv() {
            outcomes.extend(self.end_translation(ended));
        }

        while let Some(item) = self
            .feed
            .as_mut()
            .and_then(|feed| feed.next().now_or_never().flatten())
        {
            outcomes.push(self.apply_feed_item(item).await);
        }

        outcomes
    }

    async fn apply_feed_item(&mut self, item: FeedItem) -> MergeOutcome {
        match item {
            FeedItem::Change(event) => self.on_remote_change(&event),
            FeedItem::Lagged { skipped } => self.resync(skipped).await,
        }
    }

    /// Reload history and presence after the feed dropped events.
    async fn resync(&mut self, skipped: u64) -> MergeOutcome {
        let Some(group_id) = self.group_id else {
            return MergeOutcome::ForeignGroup;
        };
        warn!("Feed for {} lagged by {} events, reloading", group_id, skipped);

        let history = match self.store.list_messages(group_id).await {
            Ok(history) => history,
            Err(e) => {
                error!("Failed to reload messages for {}: {}", group_id, e);
                return MergeOutcome::Resynced { recovered: 0 };
            }
        };

        let viewer = Viewer {
            group_id,
            username: &self.identity.username,
            language: &self.identity.language,
        };
        let (view, recovered) = log::resync(std::mem::take(&mut self.view), history, &viewer);
        self.view = view;

        match self.presence.online(group_id).await {
            Ok(online) => self.online = online,
            Err(e) => warn!("Failed to reload online users for {}: {}", group_id, e),
        }

        info!("Recovered {} messages in {} after lag", recovered, group_id);
        MergeOutcome::Resynced { recovered }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}
