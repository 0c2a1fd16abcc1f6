//! In-memory implementation of the store traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite but
//! keeps everything in memory with no persistence.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use cruise_mesh_core::{Message, MessageId, Timestamp, TopicId};

use crate::error::{Result, StoreError};
use crate::traits::{InsertResult, MessageStore, SettingsStore};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock; the
/// insert-if-absent check and write happen under one write guard.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Messages indexed by id.
    messages: HashMap<MessageId, Message>,

    /// Recency index: topic -> (created_at, id), ascending.
    by_topic: HashMap<TopicId, BTreeSet<(Timestamp, MessageId)>>,

    /// Local preferences.
    settings: HashMap<String, String>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Create a store pre-populated with messages.
    pub fn with_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut inner = MemoryStoreInner::default();
        for message in messages {
            inner.insert(message);
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    fn insert(&mut self, message: Message) -> InsertResult {
        if self.messages.contains_key(&message.id) {
            return InsertResult::AlreadyExists;
        }
        self.by_topic
            .entry(message.topic_id.clone())
            .or_default()
            .insert((message.created_at, message.id.clone()));
        self.messages.insert(message.id.clone(), message);
        InsertResult::Inserted
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_if_absent(&self, message: &Message) -> Result<InsertResult> {
        let mut inner = self.write()?;
        Ok(inner.insert(message.clone()))
    }

    async fn exists(&self, id: &MessageId) -> Result<bool> {
        Ok(self.read()?.messages.contains_key(id))
    }

    async fn ids_for_topic(&self, topic: &TopicId, limit: usize) -> Result<Vec<MessageId>> {
        let inner = self.read()?;
        Ok(inner
            .by_topic
            .get(topic)
            .map(|index| {
                index
                    .iter()
                    .rev()
                    .take(limit)
                    .map(|(_, id)| id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn topics(&self) -> Result<Vec<TopicId>> {
        let inner = self.read()?;
        let mut topics: Vec<TopicId> = inner.by_topic.keys().cloned().collect();
        topics.sort();
        Ok(topics)
    }

    async fn all_ids(&self) -> Result<HashSet<MessageId>> {
        Ok(self.read()?.messages.keys().cloned().collect())
    }

    async fn most_recent_timestamp(&self, topic: &TopicId) -> Result<Option<Timestamp>> {
        let inner = self.read()?;
        Ok(inner
            .by_topic
            .get(topic)
            .and_then(|index| index.last())
            .map(|(ts, _)| *ts))
    }

    async fn count_all(&self) -> Result<u64> {
        Ok(self.read()?.messages.len() as u64)
    }

    async fn get_by_ids(&self, ids: &[MessageId]) -> Result<Vec<Message>> {
        let inner = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.messages.get(id).cloned())
            .collect())
    }

    async fn messages_for_topic(&self, topic: &TopicId, limit: usize) -> Result<Vec<Message>> {
        let inner = self.read()?;
        Ok(inner
            .by_topic
            .get(topic)
            .map(|index| {
                index
                    .iter()
                    .take(limit)
                    .filter_map(|(_, id)| inner.messages.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.write()?
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
