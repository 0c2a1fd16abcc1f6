//! Strong type definitions for Cruise Mesh.
//!
//! All identifiers are newtypes over strings so that a topic can never be
//! passed where a message id is expected.

use std::fmt;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Origin timestamp of a message, in Unix milliseconds.
pub type Timestamp = i64;

/// Length of generated message ids.
pub const MESSAGE_ID_LEN: usize = 12;

/// Globally unique message identifier, assigned by the originating node.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(MESSAGE_ID_LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty (only possible for ids decoded off the wire).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Chat topic (room) identifier.
///
/// The empty string is the default "General" topic. Case normalization is the
/// caller's business: `"Lobby"` and `"lobby"` are different topics here.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicId(String);

impl TopicId {
    /// Create a topic id.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The default topic.
    pub fn general() -> Self {
        Self(String::new())
    }

    /// Whether this is the default topic.
    pub fn is_general(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable name: `General` for the default topic, otherwise the id
    /// with its first character upper-cased.
    pub fn display_name(&self) -> String {
        let mut chars = self.0.chars();
        match chars.next() {
            None => "General".to_string(),
            Some(first) => first.to_uppercase().chain(chars).collect(),
        }
    }
}

impl fmt::Debug for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopicId({:?})", self.0)
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TopicId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TopicId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Transport-assigned identifier of a peer endpoint.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    /// Create an endpoint id, rejecting the empty string.
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if s.is_empty() {
            return Err(CoreError::EmptyEndpointId);
        }
        Ok(Self(s))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointId({})", self.0)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Get current time in milliseconds.
pub fn now_millis() -> Timestamp {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: HashSet<MessageId> = (0..1000).map(|_| MessageId::generate()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.as_str().len() == MESSAGE_ID_LEN));
    }

    #[test]
    fn test_topic_display_name() {
        assert_eq!(TopicId::general().display_name(), "General");
        assert_eq!(TopicId::from("lobby").display_name(), "Lobby");
        assert_eq!(TopicId::from("Deck 7").display_name(), "Deck 7");
    }

    #[test]
    fn test_topic_ids_are_case_sensitive() {
        assert_ne!(TopicId::from("Lobby"), TopicId::from("lobby"));
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&MessageId::from("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
        let topic: TopicId = serde_json::from_str("\"\"").unwrap();
        assert!(topic.is_general());
    }

    #[test]
    fn test_endpoint_id_rejects_empty() {
        assert!(EndpointId::new("").is_err());
        assert_eq!(EndpointId::new("peer-1").unwrap().to_string(), "peer-1");
    }
}
