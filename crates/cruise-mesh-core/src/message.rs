//! Message: the unit of replication.
//!
//! A message is immutable. Once it has been stored anywhere in the mesh its
//! content, sender, topic and timestamp never change; replicas only ever learn
//! about it or not.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::{now_millis, MessageId, Timestamp, TopicId};

/// A chat message.
///
/// Field names on the wire follow the mobile clients (`user_id`, `chat_id`,
/// `created_at`). A missing `chat_id` means the general topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    /// Globally unique id, assigned by the originating node.
    pub id: MessageId,

    /// Text payload.
    pub content: String,

    /// Author of the message. May be empty on a live send from an old client;
    /// receivers then attribute the message to the sending endpoint.
    #[serde(rename = "user_id", default)]
    pub sender_id: String,

    /// Chat room the message belongs to.
    #[serde(rename = "chat_id", default)]
    pub topic_id: TopicId,

    /// Origin timestamp (Unix milliseconds).
    pub created_at: Timestamp,
}

impl Message {
    /// Create a message with every field given.
    pub fn new(
        id: impl Into<MessageId>,
        content: impl Into<String>,
        sender_id: impl Into<String>,
        topic_id: impl Into<TopicId>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            sender_id: sender_id.into(),
            topic_id: topic_id.into(),
            created_at,
        }
    }

    /// Compose a new local message with a fresh id and the current time.
    pub fn compose(
        content: impl Into<String>,
        sender_id: impl Into<String>,
        topic_id: impl Into<TopicId>,
    ) -> Self {
        Self::new(
            MessageId::generate(),
            content,
            sender_id,
            topic_id,
            now_millis(),
        )
    }

    /// Return a copy attributed to `sender` if this message carries no sender.
    pub fn with_sender_fallback(mut self, sender: &str) -> Self {
        if self.sender_id.is_empty() {
            self.sender_id = sender.to_string();
        }
        self
    }

    /// Structural checks applied to messages arriving from peers.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(CoreError::EmptyMessageId);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let msg = Message::new("m1", "hi", "u1", "", 1_700_000_000_000);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["id"], "m1");
        assert_eq!(value["content"], "hi");
        assert_eq!(value["user_id"], "u1");
        assert_eq!(value["chat_id"], "");
        assert_eq!(value["created_at"], 1_700_000_000_000i64);
    }

    #[test]
    fn test_missing_chat_id_is_general() {
        let msg: Message = serde_json::from_str(
            r#"{"id":"m2","content":"yo","user_id":"u2","created_at":5}"#,
        )
        .unwrap();
        assert!(msg.topic_id.is_general());
    }

    #[test]
    fn test_sender_fallback_only_fills_empty() {
        let anon = Message::new("m1", "hi", "", "", 1);
        assert_eq!(anon.with_sender_fallback("peer-9").sender_id, "peer-9");

        let named = Message::new("m1", "hi", "alice", "", 1);
        assert_eq!(named.with_sender_fallback("peer-9").sender_id, "alice");
    }

    #[test]
    fn test_validate() {
        assert!(Message::new("m1", "hi", "u1", "", 1).validate().is_ok());
        assert!(Message::new("", "hi", "u1", "", 1).validate().is_err());
        // Clocks before the epoch are still valid origin timestamps.
        assert!(Message::new("m1", "hi", "u1", "", -5).validate().is_ok());
    }

    #[test]
    fn test_compose_assigns_fresh_ids() {
        let a = Message::compose("one", "u1", "lobby");
        let b = Message::compose("one", "u1", "lobby");
        assert_ne!(a.id, b.id);
        assert!(a.created_at > 0);
        assert_eq!(a.topic_id, TopicId::from("lobby"));
    }
}
