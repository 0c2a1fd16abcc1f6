//! Outward events and user-facing notifications.

use cruise_mesh_core::{EndpointId, Message, TopicId};

/// Something the node reports to its embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A peer link came up.
    PeerConnected(EndpointId),
    /// A peer link went away.
    PeerDisconnected(EndpointId),
    /// A connection attempt failed.
    ConnectionFailed {
        /// The peer that could not be reached.
        endpoint: EndpointId,
        /// Transport-specific description.
        reason: String,
    },
    /// A new live message arrived from a peer.
    MessageReceived {
        /// The peer that delivered it.
        endpoint: EndpointId,
        /// The message text.
        content: String,
    },
    /// New messages were stored.
    NewMessages {
        /// How many were stored by this delivery.
        count: u64,
        /// Total messages stored afterwards.
        total: u64,
    },
}

/// A user-facing alert for a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Stable per-topic key. A newer notification with the same key replaces
    /// the older one.
    pub key: TopicId,
    /// `"<Topic> - <sender>"`.
    pub title: String,
    /// The message text.
    pub body: String,
    /// The message being announced.
    pub message: Message,
}

impl Notification {
    /// Build the notification announcing `message`.
    pub fn for_message(message: &Message) -> Self {
        Self {
            key: message.topic_id.clone(),
            title: format!("{} - {}", message.topic_id.display_name(), message.sender_id),
            body: message.content.clone(),
            message: message.clone(),
        }
    }
}

/// Renders notifications.
///
/// Called from the node's session tasks; implementations must not block.
pub trait NotificationSink: Send + Sync {
    /// Show (or replace) the notification for its topic.
    fn notify(&self, notification: Notification);
}

/// Sink that only logs. Used when no platform sink is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify(&self, notification: Notification) {
        tracing::info!(
            topic = %notification.key,
            title = %notification.title,
            "notification"
        );
    }
}
