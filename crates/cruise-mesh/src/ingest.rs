//! Ingestion pipeline: everything that turns incoming or outgoing messages
//! into stored messages, re-floods, events and notifications.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;

use cruise_mesh_core::{EndpointId, Message, MessageId, Timestamp, TopicId};
use cruise_mesh_store::{InsertResult, MessageStore};
use cruise_mesh_sync::{PeerTransport, SyncEngine, SyncError, WireMessage};

use crate::error::{NodeError, Result};
use crate::events::{NodeEvent, Notification, NotificationSink};
use crate::subscriptions::SubscriptionRegistry;

/// What happened to one delivery of messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Messages in the delivery.
    pub received: usize,
    /// Messages newly stored.
    pub stored: usize,
    /// Messages already held.
    pub duplicates: usize,
    /// Messages rejected or lost to a storage fault.
    pub failed: usize,
    /// Topics a notification was raised for.
    pub notified: Vec<TopicId>,
}

/// Outcome of a successful local send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    /// Id of the stored message.
    pub id: MessageId,
    /// Peers the message was transmitted to.
    pub delivered: usize,
}

/// Deduplicates, persists, floods and announces messages.
pub struct IngestPipeline<S, T> {
    engine: Arc<SyncEngine<S, T>>,
    subscriptions: SubscriptionRegistry,
    notifier: Arc<dyn NotificationSink>,
    events: broadcast::Sender<NodeEvent>,
}

impl<S: MessageStore, T: PeerTransport> IngestPipeline<S, T> {
    /// Create a pipeline on top of a sync engine.
    pub fn new(
        engine: Arc<SyncEngine<S, T>>,
        subscriptions: SubscriptionRegistry,
        notifier: Arc<dyn NotificationSink>,
        events: broadcast::Sender<NodeEvent>,
    ) -> Self {
        Self {
            engine,
            subscriptions,
            notifier,
            events,
        }
    }

    /// Store a locally authored message, then transmit it to every connected
    /// peer.
    ///
    /// The store write is the durability point: a message that was stored but
    /// not delivered stays stored and the caller gets
    /// [`NodeError::Delivery`].
    pub async fn send_local(&self, message: Message) -> Result<SendReport> {
        message.validate()?;

        if self.engine.store().insert_if_absent(&message).await? == InsertResult::AlreadyExists {
            return Err(NodeError::DuplicateMessage(message.id));
        }
        tracing::debug!(id = %message.id, topic = %message.topic_id, "message stored locally");

        let id = message.id.clone();
        let payload = self
            .engine
            .config()
            .wire_format
            .encode(&WireMessage::ChatMessage(message))?;

        match self.engine.transport().broadcast(payload, None).await {
            Ok(delivered) => {
                tracing::info!(id = %id, delivered, "message sent");
                Ok(SendReport { id, delivered })
            }
            Err(SyncError::DeliveryFailed { delivered, failed }) => {
                tracing::warn!(id = %id, delivered, failed = failed.len(), "message partially delivered");
                Err(NodeError::Delivery { stored: id, failed })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ingest a live `chat_message` from `from`.
    ///
    /// `payload` is the raw bytes as received; a new message is re-flooded
    /// unchanged to every other connected peer.
    pub async fn ingest_chat_message(
        &self,
        from: &EndpointId,
        message: Message,
        payload: Bytes,
    ) -> Result<IngestReport> {
        let mut report = IngestReport {
            received: 1,
            ..Default::default()
        };

        let message = message.with_sender_fallback(from.as_str());
        message.validate()?;

        if self.engine.store().insert_if_absent(&message).await? == InsertResult::AlreadyExists {
            tracing::debug!(id = %message.id, peer = %from, "already have message, skipping");
            report.duplicates = 1;
            return Ok(report);
        }
        report.stored = 1;
        tracing::info!(id = %message.id, peer = %from, topic = %message.topic_id, "chat message stored");

        match self.engine.transport().broadcast(payload, Some(from)).await {
            Ok(reached) => tracing::debug!(id = %message.id, reached, "message re-flooded"),
            Err(e) => tracing::warn!(id = %message.id, error = %e, "re-flood incomplete"),
        }

        self.emit(NodeEvent::MessageReceived {
            endpoint: from.clone(),
            content: message.content.clone(),
        });
        self.announce_new(1).await;

        if self.subscriptions.is_subscribed(&message.topic_id) {
            self.raise(&message);
            report.notified.push(message.topic_id.clone());
        }

        Ok(report)
    }

    /// Ingest a `message_batch` served by `from`.
    ///
    /// Each message is stored independently; a storage fault on one is logged
    /// and the rest continue. Afterwards one aggregate event is emitted and at
    /// most one notification per subscribed topic, for that topic's newest
    /// newly stored message, and only if it is newer than anything the topic
    /// held before the batch.
    pub async fn ingest_batch(&self, from: &EndpointId, messages: Vec<Message>) -> IngestReport {
        let mut report = IngestReport {
            received: messages.len(),
            ..Default::default()
        };
        let mut baseline: HashMap<TopicId, Option<Timestamp>> = HashMap::new();
        let mut newest: HashMap<TopicId, Message> = HashMap::new();

        for message in messages {
            if let Err(e) = message.validate() {
                tracing::warn!(peer = %from, error = %e, "dropping invalid message from batch");
                report.failed += 1;
                continue;
            }

            if !baseline.contains_key(&message.topic_id) {
                let before = self.baseline_for(&message.topic_id).await;
                baseline.insert(message.topic_id.clone(), before);
            }

            match self.engine.store().insert_if_absent(&message).await {
                Ok(InsertResult::Inserted) => {
                    report.stored += 1;
                    let before = baseline.get(&message.topic_id).copied().flatten();
                    let newer_than_before = before.map_or(true, |ts| message.created_at > ts);
                    let newest_so_far = newest
                        .get(&message.topic_id)
                        .map_or(true, |current| message.created_at > current.created_at);
                    if newer_than_before && newest_so_far {
                        newest.insert(message.topic_id.clone(), message);
                    }
                }
                Ok(InsertResult::AlreadyExists) => report.duplicates += 1,
                Err(e) => {
                    tracing::error!(id = %message.id, peer = %from, error = %e, "failed to store message");
                    report.failed += 1;
                }
            }
        }

        if report.stored > 0 {
            self.announce_new(report.stored as u64).await;
        }

        let mut topics: Vec<_> = newest.into_iter().collect();
        topics.sort_by(|a, b| a.0.cmp(&b.0));
        for (topic, message) in topics {
            if self.subscriptions.is_subscribed(&topic) {
                self.raise(&message);
                report.notified.push(topic);
            }
        }

        tracing::info!(
            peer = %from,
            stored = report.stored,
            received = report.received,
            "message batch processed"
        );
        report
    }

    async fn baseline_for(&self, topic: &TopicId) -> Option<Timestamp> {
        match self.engine.store().most_recent_timestamp(topic).await {
            Ok(ts) => ts,
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "could not read latest timestamp");
                None
            }
        }
    }

    async fn announce_new(&self, count: u64) {
        match self.engine.store().count_all().await {
            Ok(total) => self.emit(NodeEvent::NewMessages { count, total }),
            Err(e) => tracing::error!(error = %e, "could not count messages"),
        }
    }

    fn raise(&self, message: &Message) {
        let notification = Notification::for_message(message);
        tracing::info!(topic = %message.topic_id, id = %message.id, "raised notification");
        self.notifier.notify(notification);
    }

    fn emit(&self, event: NodeEvent) {
        // No receivers is fine; the event is simply not observed.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogNotificationSink;
    use cruise_mesh_store::MemoryStore;
    use cruise_mesh_sync::{MemoryNetwork, MemoryTransport, SyncConfig};

    async fn pipeline(
        store: MemoryStore,
        subscriptions: SubscriptionRegistry,
    ) -> (IngestPipeline<MemoryStore, MemoryTransport>, broadcast::Receiver<NodeEvent>) {
        let network = MemoryNetwork::new();
        let (transport, _events) = network.join("local").await;
        let engine = Arc::new(SyncEngine::new(
            Arc::new(store),
            Arc::new(transport),
            SyncConfig::default(),
        ));
        let (tx, rx) = broadcast::channel(16);
        (
            IngestPipeline::new(engine, subscriptions, Arc::new(LogNotificationSink), tx),
            rx,
        )
    }

    fn msg(id: &str, topic: &str, ts: i64) -> Message {
        Message::new(id, format!("content {}", id), "u1", topic, ts)
    }

    #[tokio::test]
    async fn test_chat_message_applies_sender_fallback() {
        let (pipeline, mut events) = pipeline(MemoryStore::new(), SubscriptionRegistry::new()).await;
        let from = EndpointId::from("peer-1");

        let report = pipeline
            .ingest_chat_message(&from, Message::new("m1", "hi", "", "", 5), Bytes::new())
            .await
            .unwrap();
        assert_eq!(report.stored, 1);

        let stored = pipeline
            .engine
            .store()
            .get_by_ids(&[MessageId::from("m1")])
            .await
            .unwrap();
        assert_eq!(stored[0].sender_id, "peer-1");

        assert_eq!(
            events.recv().await.unwrap(),
            NodeEvent::MessageReceived {
                endpoint: from,
                content: "hi".into()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            NodeEvent::NewMessages { count: 1, total: 1 }
        );
    }

    #[tokio::test]
    async fn test_duplicate_chat_message_is_silent() {
        let (pipeline, mut events) =
            pipeline(MemoryStore::with_messages([msg("m1", "", 1)]), SubscriptionRegistry::new()).await;

        let report = pipeline
            .ingest_chat_message(&EndpointId::from("p"), msg("m1", "", 1), Bytes::new())
            .await
            .unwrap();
        assert_eq!(report.duplicates, 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_batch_only_notifies_for_newer_messages() {
        let subscriptions = SubscriptionRegistry::from_topics([TopicId::from("lobby")]);
        let (pipeline, _events) =
            pipeline(MemoryStore::with_messages([msg("old", "lobby", 100)]), subscriptions).await;

        // Everything in the batch predates what the topic already holds.
        let report = pipeline
            .ingest_batch(
                &EndpointId::from("p"),
                vec![msg("a", "lobby", 10), msg("b", "lobby", 20)],
            )
            .await;
        assert_eq!(report.stored, 2);
        assert!(report.notified.is_empty());

        let report = pipeline
            .ingest_batch(&EndpointId::from("p"), vec![msg("c", "lobby", 200)])
            .await;
        assert_eq!(report.notified, vec![TopicId::from("lobby")]);
    }

    #[tokio::test]
    async fn test_batch_counts_invalid_messages() {
        let (pipeline, _events) = pipeline(MemoryStore::new(), SubscriptionRegistry::new()).await;

        let report = pipeline
            .ingest_batch(
                &EndpointId::from("p"),
                vec![msg("", "", 1), msg("ok", "", 2), msg("ok", "", 2)],
            )
            .await;
        assert_eq!(report.received, 3);
        assert_eq!(report.stored, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_batch_stores_pre_epoch_timestamps() {
        let subscriptions = SubscriptionRegistry::from_topics([TopicId::general()]);
        let (pipeline, _events) = pipeline(MemoryStore::new(), subscriptions).await;

        let report = pipeline
            .ingest_batch(&EndpointId::from("p"), vec![msg("neg", "", -5)])
            .await;
        assert_eq!(report.stored, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.notified, vec![TopicId::general()]);
        assert!(pipeline.engine.store().exists(&MessageId::from("neg")).await.unwrap());
    }

    #[tokio::test]
    async fn test_send_local_rejects_duplicate_id() {
        let (pipeline, _events) =
            pipeline(MemoryStore::with_messages([msg("m1", "", 1)]), SubscriptionRegistry::new()).await;

        let err = pipeline.send_local(msg("m1", "", 2)).await.unwrap_err();
        assert!(matches!(err, NodeError::DuplicateMessage(id) if id.as_str() == "m1"));
    }

    #[tokio::test]
    async fn test_send_local_without_peers() {
        let (pipeline, _events) = pipeline(MemoryStore::new(), SubscriptionRegistry::new()).await;

        let report = pipeline.send_local(msg("m1", "", 1)).await.unwrap();
        assert_eq!(report.delivered, 0);
        assert!(pipeline.engine.store().exists(&MessageId::from("m1")).await.unwrap());
    }
}
