//! Store traits: the abstract interface for message persistence.
//!
//! These traits keep the sync engine storage-agnostic. Implementations include
//! SQLite (primary) and in-memory (for tests).

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use cruise_mesh_core::{Message, MessageId, Timestamp, TopicId};

use crate::error::Result;

/// Result of inserting a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Message was new and is now stored.
    Inserted,
    /// A message with this id already exists (idempotent - not an error).
    AlreadyExists,
}

impl InsertResult {
    /// True iff the message was newly stored.
    pub fn is_inserted(self) -> bool {
        matches!(self, InsertResult::Inserted)
    }
}

/// The MessageStore trait: async interface for message persistence.
///
/// All methods are async so SQLite can move its blocking work off the runtime
/// with `spawn_blocking`.
///
/// # Design Notes
///
/// - **Insert-only**: there is no update or delete.
/// - **Atomic dedup**: `insert_if_absent` must check and insert as one
///   operation. Callers never do check-then-insert themselves.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a message unless one with the same id exists.
    async fn insert_if_absent(&self, message: &Message) -> Result<InsertResult>;

    /// Check whether a message with this id is stored.
    async fn exists(&self, id: &MessageId) -> Result<bool>;

    /// Ids of the `limit` most recent messages in a topic, newest first.
    async fn ids_for_topic(&self, topic: &TopicId, limit: usize) -> Result<Vec<MessageId>>;

    /// Every topic that has at least one stored message.
    async fn topics(&self) -> Result<Vec<TopicId>>;

    /// Every stored message id.
    ///
    /// This is a full scan. It is reserved for the responder side of
    /// reconciliation, which must compare against the complete local set.
    async fn all_ids(&self) -> Result<HashSet<MessageId>>;

    /// Timestamp of the most recent message in a topic, if any.
    async fn most_recent_timestamp(&self, topic: &TopicId) -> Result<Option<Timestamp>>;

    /// Total number of stored messages.
    async fn count_all(&self) -> Result<u64>;

    /// Fetch the messages for the given ids. Unknown ids are skipped.
    async fn get_by_ids(&self, ids: &[MessageId]) -> Result<Vec<Message>>;

    /// Up to `limit` messages of a topic, oldest first.
    async fn messages_for_topic(&self, topic: &TopicId, limit: usize) -> Result<Vec<Message>>;
}

/// Small key/value preferences kept next to the messages (username, saved
/// subscriptions).
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read a setting.
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    /// Write a setting, replacing any previous value.
    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}

#[async_trait]
impl<S: MessageStore + ?Sized> MessageStore for Arc<S> {
    async fn insert_if_absent(&self, message: &Message) -> Result<InsertResult> {
        (**self).insert_if_absent(message).await
    }

    async fn exists(&self, id: &MessageId) -> Result<bool> {
        (**self).exists(id).await
    }

    async fn ids_for_topic(&self, topic: &TopicId, limit: usize) -> Result<Vec<MessageId>> {
        (**self).ids_for_topic(topic, limit).await
    }

    async fn topics(&self) -> Result<Vec<TopicId>> {
        (**self).topics().await
    }

    async fn all_ids(&self) -> Result<HashSet<MessageId>> {
        (**self).all_ids().await
    }

    async fn most_recent_timestamp(&self, topic: &TopicId) -> Result<Option<Timestamp>> {
        (**self).most_recent_timestamp(topic).await
    }

    async fn count_all(&self) -> Result<u64> {
        (**self).count_all().await
    }

    async fn get_by_ids(&self, ids: &[MessageId]) -> Result<Vec<Message>> {
        (**self).get_by_ids(ids).await
    }

    async fn messages_for_topic(&self, topic: &TopicId, limit: usize) -> Result<Vec<Message>> {
        (**self).messages_for_topic(topic, limit).await
    }
}

#[async_trait]
impl<S: SettingsStore + ?Sized> SettingsStore for Arc<S> {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        (**self).get_setting(key).await
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        (**self).set_setting(key, value).await
    }
}

/// Extension trait for common store patterns.
pub trait StoreExt: MessageStore {
    /// The most recent `per_topic` ids of every topic, merged into one set.
    ///
    /// This is the bounded "known ids" snapshot a node advertises when a peer
    /// connects. Messages older than the window are not advertised.
    fn recent_ids_per_topic(
        &self,
        per_topic: usize,
    ) -> impl std::future::Future<Output = Result<BTreeSet<MessageId>>> + Send;
}

impl<S: MessageStore + ?Sized> StoreExt for S {
    async fn recent_ids_per_topic(&self, per_topic: usize) -> Result<BTreeSet<MessageId>> {
        let mut ids = BTreeSet::new();
        for topic in self.topics().await? {
            ids.extend(self.ids_for_topic(&topic, per_topic).await?);
        }
        Ok(ids)
    }
}
