use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use tracing::error;
use uuid::Uuid;

use babel_db::Database;
use babel_db::feed::RecvError;
use babel_types::events::ChangeEvent;
use babel_types::models::{Group, Message, NewMessage, Presence};

use crate::error::StoreError;

/// One delivery from a group's change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    Change(ChangeEvent),
    /// The subscriber fell behind and `skipped` events are gone. Anything
    /// built from the feed must be reloaded from the store.
    Lagged { skipped: u64 },
}

/// A group's change feed, in commit order. Ends when the store shuts down.
pub type ChangeStream = BoxStream<'static, FeedItem>;

/// The shared store every client writes through and subscribes to.
///
/// All mutations are single-row; the store owns atomicity of each row,
/// including the read-modify-write in [`RemoteStore::merge_translations`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn find_group(&self, name: &str) -> Result<Option<Group>, StoreError>;
    async fn create_group(&self, name: &str) -> Result<Group, StoreError>;

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError>;
    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError>;
    /// Full history, ascending by `created_at`.
    async fn list_messages(&self, group_id: Uuid) -> Result<Vec<Message>, StoreError>;
    /// Union `translations` into the message's stored map.
    async fn merge_translations(
        &self,
        id: Uuid,
        translations: BTreeMap<String, String>,
    ) -> Result<Message, StoreError>;

    async fn upsert_presence(
        &self,
        group_id: Uuid,
        username: &str,
        language: &str,
    ) -> Result<Presence, StoreError>;
    async fn touch_presence(&self, group_id: Uuid, username: &str) -> Result<(), StoreError>;
    async fn set_offline(&self, group_id: Uuid, username: &str) -> Result<(), StoreError>;
    /// Online rows, sorted by username.
    async fn online_presence(&self, group_id: Uuid) -> Result<Vec<Presence>, StoreError>;

    /// Change feed for one group.
    fn subscribe(&self, group_id: Uuid) -> ChangeStream;
}

/// [`RemoteStore`] backed by the SQLite database. Queries run on the
/// blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StoreError::Unavailable(e.to_string())
            })?
            .map_err(StoreError::Backend)
    }
}

#[async_trait]
impl RemoteStore for SqliteStore {
    async fn find_group(&self, name: &str) -> Result<Option<Group>, StoreError> {
        let name = name.to_string();
        self.blocking(move |db| db.find_group_by_name(&name)).await
    }

    async fn create_group(&self, name: &str) -> Result<Group, StoreError> {
        let name = name.to_string();
        self.blocking(move |db| db.create_group(&name)).await
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.blocking(move |db| db.insert_message(&message)).await
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        self.blocking(move |db| db.get_message(&id.to_string())).await
    }

    async fn list_messages(&self, group_id: Uuid) -> Result<Vec<Message>, StoreError> {
        self.blocking(move |db| db.get_messages(&group_id.to_string())).await
    }

    async fn merge_translations(
        &self,
        id: Uuid,
        translations: BTreeMap<String, String>,
    ) -> Result<Message, StoreError> {
        self.blocking(move |db| db.merge_translations(&id.to_string(), &translations))
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn upsert_presence(
        &self,
        group_id: Uuid,
        username: &str,
        language: &str,
    ) -> Result<Presence, StoreError> {
        let username = username.to_string();
        let language = language.to_string();
        self.blocking(move |db| db.upsert_presence(&group_id.to_string(), &username, &language))
            .await
    }

    async fn touch_presence(&self, group_id: Uuid, username: &str) -> Result<(), StoreError> {
        let username = username.to_string();
        self.blocking(move |db| db.touch_presence(&group_id.to_string(), &username))
            .await?
            .map(|_| ())
            .ok_or(StoreError::NotFound(group_id))
    }

    async fn set_offline(&self, group_id: Uuid, username: &str) -> Result<(), StoreError> {
        let username = username.to_string();
        self.blocking(move |db| db.set_offline(&group_id.to_string(), &username))
            .await?
            .map(|_| ())
            .ok_or(StoreError::NotFound(group_id))
    }

    async fn online_presence(&self, group_id: Uuid) -> Result<Vec<Presence>, StoreError> {
        self.blocking(move |db| db.get_online_presence(&group_id.to_string())).await
    }

    fn subscribe(&self, group_id: Uuid) -> ChangeStream {
        let subscription = self.db.feed().subscribe(group_id);

        stream::unfold(subscription, |mut subscription| async move {
            let item = match subscription.recv().await {
                Ok(event) => FeedItem::Change(event),
                Err(RecvError::Lagged(skipped)) => FeedItem::Lagged { skipped },
                Err(RecvError::Closed) => return None,
            };
            Some((item, subscription))
        })
        .boxed()
    }
}
