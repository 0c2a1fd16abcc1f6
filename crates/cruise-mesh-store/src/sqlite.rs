//! SQLite implementation of the store traits.
//!
//! This is the primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use cruise_mesh_core::{Message, MessageId, Timestamp, TopicId};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{InsertResult, MessageStore, SettingsStore};

/// Upper bound on bound parameters per `IN (...)` query.
const MAX_IN_PARAMS: usize = 500;

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

// Helper to convert a row to Message
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get("id")?;
    let topic: String = row.get("topic_id")?;
    Ok(Message {
        id: MessageId::from(id),
        content: row.get("content")?,
        sender_id: row.get("sender_id")?,
        topic_id: TopicId::from(topic),
        created_at: row.get("created_at")?,
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert_if_absent(&self, message: &Message) -> Result<InsertResult> {
        let message = message.clone();

        self.blocking(move |conn| {
            // The primary key makes this a single atomic check-and-insert.
            let changed = conn.execute(
                "INSERT OR IGNORE INTO messages (id, content, sender_id, topic_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id.as_str(),
                    message.content,
                    message.sender_id,
                    message.topic_id.as_str(),
                    message.created_at,
                ],
            )?;

            if changed == 1 {
                Ok(InsertResult::Inserted)
            } else {
                Ok(InsertResult::AlreadyExists)
            }
        })
        .await
    }

    async fn exists(&self, id: &MessageId) -> Result<bool> {
        let id = id.clone();

        self.blocking(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM messages WHERE id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn ids_for_topic(&self, topic: &TopicId, limit: usize) -> Result<Vec<MessageId>> {
        let topic = topic.clone();

        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM messages WHERE topic_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?;

            let ids = stmt
                .query_map(params![topic.as_str(), limit as i64], |row| {
                    row.get::<_, String>(0).map(MessageId::from)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(ids)
        })
        .await
    }

    async fn topics(&self) -> Result<Vec<TopicId>> {
        self.blocking(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT topic_id FROM messages ORDER BY topic_id")?;

            let topics = stmt
                .query_map([], |row| row.get::<_, String>(0).map(TopicId::from))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(topics)
        })
        .await
    }

    async fn all_ids(&self) -> Result<HashSet<MessageId>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM messages")?;

            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0).map(MessageId::from))?
                .collect::<rusqlite::Result<HashSet<_>>>()?;

            Ok(ids)
        })
        .await
    }

    async fn most_recent_timestamp(&self, topic: &TopicId) -> Result<Option<Timestamp>> {
        let topic = topic.clone();

        self.blocking(move |conn| {
            let ts: Option<Timestamp> = conn.query_row(
                "SELECT MAX(created_at) FROM messages WHERE topic_id = ?1",
                params![topic.as_str()],
                |row| row.get(0),
            )?;
            Ok(ts)
        })
        .await
    }

    async fn count_all(&self) -> Result<u64> {
        self.blocking(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    async fn get_by_ids(&self, ids: &[MessageId]) -> Result<Vec<Message>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = ids.to_vec();

        self.blocking(move |conn| {
            let mut messages = Vec::with_capacity(ids.len());

            for chunk in ids.chunks(MAX_IN_PARAMS) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                let sql = format!(
                    "SELECT id, content, sender_id, topic_id, created_at
                     FROM messages WHERE id IN ({})",
                    placeholders
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(chunk.iter().map(|id| id.as_str())), row_to_message)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                messages.extend(rows);
            }

            Ok(messages)
        })
        .await
    }

    async fn messages_for_topic(&self, topic: &TopicId, limit: usize) -> Result<Vec<Message>> {
        let topic = topic.clone();

        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, content, sender_id, topic_id, created_at
                 FROM messages WHERE topic_id = ?1
                 ORDER BY created_at ASC, id ASC LIMIT ?2",
            )?;

            let messages = stmt
                .query_map(params![topic.as_str(), limit as i64], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(messages)
        })
        .await
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();

        self.blocking(move |conn| {
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();

        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;

    fn msg(id: &str, topic: &str, ts: i64) -> Message {
        Message::new(id, format!("content {}", id), "u1", topic, ts)
    }

    #[tokio::test]
    async fn test_insert_and_get_message() {
        let store = SqliteStore::open_memory().unwrap();
        let m = msg("m1", "lobby", 42);

        let result = store.insert_if_absent(&m).await.unwrap();
        assert_eq!(result, InsertResult::Inserted);

        let fetched = store.get_by_ids(&[MessageId::from("m1")]).await.unwrap();
        assert_eq!(fetched, vec![m]);
        assert!(store.exists(&MessageId::from("m1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_idempotent_insert() {
        let store = SqliteStore::open_memory().unwrap();
        let m = msg("m1", "", 1);

        let r1 = store.insert_if_absent(&m).await.unwrap();
        assert_eq!(r1, InsertResult::Inserted);

        let r2 = store
            .insert_if_absent(&Message::new("m1", "changed", "u2", "x", 2))
            .await
            .unwrap();
        assert_eq!(r2, InsertResult::AlreadyExists);

        let fetched = store.get_by_ids(&[MessageId::from("m1")]).await.unwrap();
        assert_eq!(fetched, vec![m]);
        assert_eq!(store.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recency_queries() {
        let store = SqliteStore::open_memory().unwrap();
        for i in 0..5 {
            store
                .insert_if_absent(&msg(&format!("l{}", i), "lobby", 100 + i))
                .await
                .unwrap();
        }
        store.insert_if_absent(&msg("g0", "", 7)).await.unwrap();

        let ids = store.ids_for_topic(&TopicId::from("lobby"), 2).await.unwrap();
        assert_eq!(ids, vec![MessageId::from("l4"), MessageId::from("l3")]);

        assert_eq!(
            store.topics().await.unwrap(),
            vec![TopicId::general(), TopicId::from("lobby")]
        );
        assert_eq!(
            store.most_recent_timestamp(&TopicId::from("lobby")).await.unwrap(),
            Some(104)
        );
        assert_eq!(
            store.most_recent_timestamp(&TopicId::from("nobody")).await.unwrap(),
            None
        );

        let window = store.recent_ids_per_topic(2).await.unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(store.all_ids().await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_get_by_ids_skips_unknown_and_spans_chunks() {
        let store = SqliteStore::open_memory().unwrap();
        let mut wanted = Vec::new();
        for i in 0..(MAX_IN_PARAMS + 20) {
            let id = format!("m{}", i);
            store.insert_if_absent(&msg(&id, "", i as i64)).await.unwrap();
            wanted.push(MessageId::from(id));
        }
        wanted.push(MessageId::from("missing"));

        let fetched = store.get_by_ids(&wanted).await.unwrap();
        assert_eq!(fetched.len(), MAX_IN_PARAMS + 20);
        assert!(store.get_by_ids(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_messages_for_topic() {
        let store = SqliteStore::open_memory().unwrap();
        store.insert_if_absent(&msg("b", "deck", 20)).await.unwrap();
        store.insert_if_absent(&msg("a", "deck", 10)).await.unwrap();
        store.insert_if_absent(&msg("c", "lobby", 5)).await.unwrap();

        let listed = store.messages_for_topic(&TopicId::from("deck"), 10).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_settings_upsert() {
        let store = SqliteStore::open_memory().unwrap();
        store.set_setting("username", "alice").await.unwrap();
        store.set_setting("username", "bob").await.unwrap();
        assert_eq!(
            store.get_setting("username").await.unwrap().as_deref(),
            Some("bob")
        );
        assert_eq!(store.get_setting("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cruise-chat.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_if_absent(&msg("m1", "", 1)).await.unwrap();
            store.set_setting("username", "alice").await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert!(store.exists(&MessageId::from("m1")).await.unwrap());
        assert_eq!(store.count_all().await.unwrap(), 1);
        assert_eq!(
            store.get_setting("username").await.unwrap().as_deref(),
            Some("alice")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_insert_exactly_once() {
        let store = SqliteStore::open_memory().unwrap();
        let m = msg("race", "", 1);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let m = m.clone();
            handles.push(tokio::spawn(async move {
                store.insert_if_absent(&m).await.unwrap()
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap().is_inserted() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
    }
}
