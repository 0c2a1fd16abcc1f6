//! Subscription registry: the topics the local user wants notifications for.
//!
//! The set lives in memory only. Callers that want it to survive a restart
//! save and load it explicitly through the node.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use cruise_mesh_core::TopicId;

/// Shared handle to the set of subscribed topics.
///
/// Cloning the handle shares the set. A writer that panicked cannot leave the
/// set half-updated, so a poisoned lock is simply taken over.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    topics: Arc<RwLock<HashSet<TopicId>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with `topics`.
    pub fn from_topics(topics: impl IntoIterator<Item = TopicId>) -> Self {
        Self {
            topics: Arc::new(RwLock::new(topics.into_iter().collect())),
        }
    }

    /// Subscribe to a topic. Returns false if it was already subscribed.
    pub fn subscribe(&self, topic: impl Into<TopicId>) -> bool {
        let topic = topic.into();
        let added = self.write(|set| set.insert(topic.clone()));
        tracing::debug!(topic = %topic, added, "subscribe");
        added
    }

    /// Unsubscribe from a topic. Returns true iff it was subscribed.
    pub fn unsubscribe(&self, topic: &TopicId) -> bool {
        let removed = self.write(|set| set.remove(topic));
        tracing::debug!(topic = %topic, removed, "unsubscribe");
        removed
    }

    /// Whether notifications fire for this topic.
    pub fn is_subscribed(&self, topic: &TopicId) -> bool {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(topic)
    }

    /// Snapshot of the subscribed topics.
    pub fn list(&self) -> BTreeSet<TopicId> {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.write(|set| set.clear());
        tracing::debug!("cleared subscriptions");
    }

    /// Replace the whole set.
    pub fn replace(&self, topics: impl IntoIterator<Item = TopicId>) {
        let topics: HashSet<TopicId> = topics.into_iter().collect();
        self.write(|set| *set = topics);
    }

    fn write<R>(&self, f: impl FnOnce(&mut HashSet<TopicId>) -> R) -> R {
        let mut guard = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_unsubscribe() {
        let registry = SubscriptionRegistry::new();
        let lobby = TopicId::from("lobby");

        assert!(registry.subscribe("lobby"));
        assert!(!registry.subscribe("lobby"));
        assert!(registry.is_subscribed(&lobby));

        assert!(registry.unsubscribe(&lobby));
        assert!(!registry.unsubscribe(&lobby));
        assert!(!registry.is_subscribed(&lobby));
    }

    #[test]
    fn test_clones_share_state() {
        let registry = SubscriptionRegistry::from_topics([TopicId::general()]);
        let handle = registry.clone();

        handle.subscribe("deck");
        assert_eq!(
            registry.list(),
            [TopicId::general(), TopicId::from("deck")].into_iter().collect()
        );

        registry.clear();
        assert!(handle.list().is_empty());
    }

    #[test]
    fn test_concurrent_updates() {
        let registry = SubscriptionRegistry::new();
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        registry.subscribe(format!("t{}", (i * 50 + j) % 100));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(registry.list().len(), 100);
    }
}
