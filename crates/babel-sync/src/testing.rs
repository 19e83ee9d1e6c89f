use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use babel_db::Database;
use babel_types::models::{Group, Message, MessageType, NewMessage, Presence};

use crate::error::{OracleError, StoreError};
use crate::oracle::TranslationOracle;
use crate::store::{ChangeStream, RemoteStore, SqliteStore};

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::new(Arc::new(Database::open_in_memory().unwrap())))
}

/// Oracle stub that records every (source, target) pair it is asked for.
#[derive(Default)]
pub struct RecordingOracle {
    calls: Mutex<Vec<(String, String)>>,
    replies: HashMap<(String, String), String>,
    failing_targets: HashSet<String>,
}

impl RecordingOracle {
    /// Answer `text` for translations from `source` to `target`.
    pub fn reply(mut self, source: &str, target: &str, text: &str) -> Self {
        self.replies
            .insert((source.to_string(), target.to_string()), text.to_string());
        self
    }

    /// Fail every call whose target is `target`.
    pub fn fail_for(mut self, target: &str) -> Self {
        self.failing_targets.insert(target.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranslationOracle for RecordingOracle {
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, OracleError> {
        self.calls
            .lock()
            .unwrap()
            .push((source.to_string(), target.to_string()));

        if self.failing_targets.contains(target) {
            return Err(OracleError::Unavailable(format!("no route to {}", target)));
        }

        // Unscripted pairs echo the input, like a model that gave up
        Ok(self
            .replies
            .get(&(source.to_string(), target.to_string()))
            .cloned()
            .unwrap_or_else(|| text.to_string()))
    }
}

/// Oracle whose calls never complete.
pub struct StalledOracle;

#[async_trait]
impl TranslationOracle for StalledOracle {
    async fn translate(&self, _text: &str, _source: &str, _target: &str) -> Result<String, OracleError> {
        std::future::pending().await
    }
}

/// Store that fails the named operations and passes the rest through.
///
/// Message inserts are split into `insert_user_message` and
/// `insert_system_message` so a test can break one kind only.
pub struct FlakyStore {
    inner: Arc<SqliteStore>,
    failing: HashSet<&'static str>,
}

impl FlakyStore {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            failing: HashSet::new(),
        }
    }

    pub fn fail(mut self, operation: &'static str) -> Self {
        self.failing.insert(operation);
        self
    }

    fn check(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.failing.contains(operation) {
            Err(StoreError::Unavailable(format!("{} is down", operation)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for FlakyStore {
    async fn find_group(&self, name: &str) -> Result<Option<Group>, StoreError> {
        self.check("find_group")?;
        self.inner.find_group(name).await
    }

    async fn create_group(&self, name: &str) -> Result<Group, StoreError> {
        self.check("create_group")?;
        self.inner.create_group(name).await
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        match message.message_type {
            MessageType::User => self.check("insert_user_message")?,
            MessageType::System => self.check("insert_system_message")?,
        }
        self.inner.insert_message(message).await
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        self.check("get_message")?;
        self.inner.get_message(id).await
    }

    async fn list_messages(&self, group_id: Uuid) -> Result<Vec<Message>, StoreError> {
        self.check("list_messages")?;
        self.inner.list_messages(group_id).await
    }

    async fn merge_translations(
        &self,
        id: Uuid,
        translations: BTreeMap<String, String>,
    ) -> Result<Message, StoreError> {
        self.check("merge_translations")?;
        self.inner.merge_translations(id, translations).await
    }

    async fn upsert_presence(
        &self,
        group_id: Uuid,
        username: &str,
        language: &str,
    ) -> Result<Presence, StoreError> {
        self.check("upsert_presence")?;
        self.inner.upsert_presence(group_id, username, language).await
    }

    async fn touch_presence(&self, group_id: Uuid, username: &str) -> Result<(), StoreError> {
        self.check("touch_presence")?;
        self.inner.touch_presence(group_id, username).await
    }

    async fn set_offline(&self, group_id: Uuid, username: &str) -> Result<(), StoreError> {
        self.check("set_offline")?;
        self.inner.set_offline(group_id, username).await
    }

    async fn online_presence(&self, group_id: Uuid) -> Result<Vec<Presence>, StoreError> {
        self.check("online_presence")?;
        self.inner.online_presence(group_id).await
    }

    fn subscribe(&self, group_id: Uuid) -> ChangeStream {
        self.inner.subscribe(group_id)
    }
}
