//! The mesh node: one service object owning sessions, subscriptions and the
//! running flag.
//!
//! The node consumes the transport's [`PeerEvent`] stream on a dispatcher
//! task. Every connected peer gets its own session task with an ordered
//! payload queue, so a slow peer never holds up the others. Outward events go
//! to a broadcast channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use cruise_mesh_core::{EndpointId, Message, TopicId};
use cruise_mesh_store::{MessageStore, SettingsStore, StoreError};
use cruise_mesh_sync::{PeerEvent, PeerSession, PeerTransport, SyncEngine, WireMessage};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::events::{LogNotificationSink, NodeEvent, NotificationSink};
use crate::ingest::{IngestPipeline, SendReport};
use crate::subscriptions::SubscriptionRegistry;

/// Settings key for the local username.
pub const USERNAME_KEY: &str = "username";

/// Settings key for saved notification subscriptions.
pub const SUBSCRIPTIONS_KEY: &str = "notification_subscriptions";

struct SessionHandle {
    queue: mpsc::UnboundedSender<Bytes>,
    task: JoinHandle<()>,
}

struct Shared<S, T> {
    engine: Arc<SyncEngine<S, T>>,
    pipeline: IngestPipeline<S, T>,
    events: broadcast::Sender<NodeEvent>,
    sessions: Mutex<HashMap<EndpointId, SessionHandle>>,
    running: AtomicBool,
}

/// A node in the chat mesh.
///
/// # Example
///
/// ```rust,no_run
/// use cruise_mesh::{MeshNode, NodeConfig};
/// use cruise_mesh::store::MemoryStore;
/// use cruise_mesh::sync::MemoryNetwork;
///
/// async fn example() -> cruise_mesh::Result<()> {
///     let network = MemoryNetwork::new();
///     let (transport, peer_events) = network.join("phone-a").await;
///
///     let node = MeshNode::new(MemoryStore::new(), transport, NodeConfig::default());
///     node.start(peer_events)?;
///     node.subscriptions().subscribe("lobby");
///     node.send_text("hello", "lobby").await?;
///     Ok(())
/// }
/// ```
pub struct MeshNode<S, T> {
    shared: Arc<Shared<S, T>>,
    subscriptions: SubscriptionRegistry,
    config: NodeConfig,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<S, T> MeshNode<S, T>
where
    S: MessageStore + SettingsStore + 'static,
    T: PeerTransport + 'static,
{
    /// Create a node that only logs notifications.
    pub fn new(store: S, transport: T, config: NodeConfig) -> Self {
        Self::with_notification_sink(store, transport, config, Arc::new(LogNotificationSink))
    }

    /// Create a node that renders notifications through `sink`.
    pub fn with_notification_sink(
        store: S,
        transport: T,
        config: NodeConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let engine = Arc::new(SyncEngine::new(
            Arc::new(store),
            Arc::new(transport),
            config.sync.clone(),
        ));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let subscriptions = SubscriptionRegistry::new();
        let pipeline = IngestPipeline::new(
            Arc::clone(&engine),
            subscriptions.clone(),
            sink,
            events.clone(),
        );

        Self {
            shared: Arc::new(Shared {
                engine,
                pipeline,
                events,
                sessions: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
            }),
            subscriptions,
            config,
            dispatcher: Mutex::new(None),
        }
    }

    /// The message store.
    pub fn store(&self) -> &Arc<S> {
        self.shared.engine.store()
    }

    /// The peer transport.
    pub fn transport(&self) -> &Arc<T> {
        self.shared.engine.transport()
    }

    /// The active configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Shared handle to the notification subscriptions.
    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Subscribe to outward events.
    pub fn events(&self) -> broadcast::Receiver<NodeEvent> {
        self.shared.events.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start consuming the transport's peer events.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, peer_events: mpsc::UnboundedReceiver<PeerEvent>) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyRunning);
        }

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let mut peer_events = peer_events;
            while let Some(event) = peer_events.recv().await {
                shared.handle_peer_event(event).await;
            }
            tracing::info!("peer event stream closed");
            shared.close_all_sessions();
            shared.running.store(false, Ordering::SeqCst);
        });

        if let Some(previous) = lock(&self.dispatcher).replace(handle) {
            previous.abort();
        }
        tracing::info!("mesh node started");
        Ok(())
    }

    /// Stop the node: abandon every session and drop every peer link.
    pub async fn stop(&self) -> Result<()> {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return Err(NodeError::NotRunning);
        }

        if let Some(handle) = lock(&self.dispatcher).take() {
            handle.abort();
        }
        self.shared.close_all_sessions();

        let transport = self.transport();
        for peer in transport.connected_peers().await {
            if let Err(e) = transport.disconnect(&peer).await {
                tracing::warn!(peer = %peer, error = %e, "failed to disconnect peer");
            }
        }

        tracing::info!("mesh node stopped");
        Ok(())
    }

    /// Whether the node is consuming peer events.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Process one peer event directly, bypassing the dispatcher.
    ///
    /// For platform drivers that deliver transport callbacks themselves.
    pub async fn handle_peer_event(&self, event: PeerEvent) {
        self.shared.handle_peer_event(event).await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Store and transmit a fully formed local message.
    pub async fn send_message(&self, message: Message) -> Result<SendReport> {
        if !self.is_running() {
            return Err(NodeError::NotRunning);
        }
        self.shared.pipeline.send_local(message).await
    }

    /// Compose a message from the stored username and send it.
    ///
    /// Without a username the sender is left empty and receivers attribute
    /// the message to this node's endpoint.
    pub async fn send_text(
        &self,
        content: impl Into<String>,
        topic: impl Into<TopicId>,
    ) -> Result<SendReport> {
        let sender = self.username().await?.unwrap_or_default();
        self.send_message(Message::compose(content, sender, topic))
            .await
    }

    /// Total number of stored messages.
    pub async fn message_count(&self) -> Result<u64> {
        Ok(self.store().count_all().await?)
    }

    /// Up to `limit` messages of a topic, oldest first.
    pub async fn messages(&self, topic: &TopicId, limit: usize) -> Result<Vec<Message>> {
        Ok(self.store().messages_for_topic(topic, limit).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Peers
    // ─────────────────────────────────────────────────────────────────────────

    /// Peers the transport currently has links to.
    pub async fn connected_peers(&self) -> Vec<EndpointId> {
        self.transport().connected_peers().await
    }

    /// Peers with a live session, sorted.
    pub fn active_sessions(&self) -> Vec<EndpointId> {
        let mut peers: Vec<_> = lock(&self.shared.sessions).keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Drop the link to one peer and abandon its session.
    pub async fn disconnect_peer(&self, peer: &EndpointId) -> Result<()> {
        self.shared.close_session(peer);
        self.transport().disconnect(peer).await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Preferences
    // ─────────────────────────────────────────────────────────────────────────

    /// The stored username, if one was set.
    pub async fn username(&self) -> Result<Option<String>> {
        Ok(self.store().get_setting(USERNAME_KEY).await?)
    }

    /// Store the username used by [`send_text`](Self::send_text).
    pub async fn set_username(&self, username: &str) -> Result<()> {
        Ok(self.store().set_setting(USERNAME_KEY, username).await?)
    }

    /// Persist the current subscriptions.
    pub async fn save_subscriptions(&self) -> Result<()> {
        let topics: Vec<String> = self
            .subscriptions
            .list()
            .into_iter()
            .map(|t| t.as_str().to_string())
            .collect();
        let encoded = serde_json::to_string(&topics)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store().set_setting(SUBSCRIPTIONS_KEY, &encoded).await?;
        Ok(())
    }

    /// Replace the current subscriptions with the saved ones.
    ///
    /// Returns how many topics were loaded. Nothing saved leaves the registry
    /// untouched.
    pub async fn load_subscriptions(&self) -> Result<usize> {
        let Some(encoded) = self.store().get_setting(SUBSCRIPTIONS_KEY).await? else {
            return Ok(0);
        };
        let topics: Vec<String> = serde_json::from_str(&encoded)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let count = topics.len();
        self.subscriptions
            .replace(topics.into_iter().map(TopicId::from));
        Ok(count)
    }
}

impl<S, T> Drop for MeshNode<S, T> {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.dispatcher).take() {
            handle.abort();
        }
        for (_, session) in lock(&self.shared.sessions).drain() {
            session.task.abort();
        }
    }
}

impl<S, T> Shared<S, T>
where
    S: MessageStore + 'static,
    T: PeerTransport + 'static,
{
    async fn handle_peer_event(self: &Arc<Self>, event: PeerEvent) {
        match event {
            PeerEvent::Connected(peer) => {
                tracing::info!(peer = %peer, "peer connected");
                self.open_session(peer.clone());
                self.emit(NodeEvent::PeerConnected(peer));
            }
            PeerEvent::Disconnected(peer) => {
                tracing::info!(peer = %peer, "peer disconnected");
                self.close_session(&peer);
                self.emit(NodeEvent::PeerDisconnected(peer));
            }
            PeerEvent::ConnectionFailed { endpoint, reason } => {
                tracing::warn!(peer = %endpoint, reason = %reason, "connection failed");
                self.emit(NodeEvent::ConnectionFailed { endpoint, reason });
            }
            PeerEvent::Payload { from, bytes } => {
                let sessions = lock(&self.sessions);
                match sessions.get(&from) {
                    Some(session) => {
                        if session.queue.send(bytes).is_err() {
                            tracing::debug!(peer = %from, "session already finished, payload dropped");
                        }
                    }
                    None => {
                        tracing::debug!(peer = %from, "payload from peer without session dropped");
                    }
                }
            }
        }
    }

    fn open_session(self: &Arc<Self>, peer: EndpointId) {
        let (queue, payloads) = mpsc::unbounded_channel();
        let shared = Arc::clone(self);
        let session = PeerSession::connected(peer.clone());
        let task = tokio::spawn(async move { shared.run_session(session, payloads).await });

        if let Some(previous) = lock(&self.sessions).insert(peer, SessionHandle { queue, task }) {
            previous.task.abort();
        }
    }

    fn close_session(&self, peer: &EndpointId) {
        if let Some(session) = lock(&self.sessions).remove(peer) {
            session.task.abort();
            tracing::debug!(peer = %peer, "session abandoned");
        }
    }

    fn close_all_sessions(&self) {
        for (peer, session) in lock(&self.sessions).drain() {
            session.task.abort();
            tracing::debug!(peer = %peer, "session abandoned");
        }
    }

    async fn run_session(&self, mut session: PeerSession, mut payloads: mpsc::UnboundedReceiver<Bytes>) {
        if let Err(e) = self.engine.initiate(&mut session).await {
            tracing::warn!(peer = %session.endpoint(), error = %e, "failed to start sync");
        }

        while let Some(payload) = payloads.recv().await {
            self.handle_payload(&mut session, payload).await;
        }

        session.close();
        tracing::debug!(
            peer = %session.endpoint(),
            requests_answered = session.requests_answered,
            batches_served = session.batches_served,
            messages_received = session.messages_received,
            "session ended"
        );
    }

    async fn handle_payload(&self, session: &mut PeerSession, payload: Bytes) {
        let message = match self.engine.decode(&payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(peer = %session.endpoint(), error = %e, "discarding malformed payload");
                return;
            }
        };
        tracing::debug!(peer = %session.endpoint(), kind = message.kind(), "payload received");

        match message {
            WireMessage::SyncRequest { ids } => {
                if let Err(e) = self.engine.handle_sync_request(session, &ids).await {
                    tracing::warn!(peer = %session.endpoint(), error = %e, "failed to answer sync request");
                }
            }
            WireMessage::SyncResponse { requested_ids } => {
                if let Err(e) = self.engine.handle_sync_response(session, &requested_ids).await {
                    tracing::warn!(peer = %session.endpoint(), error = %e, "failed to serve sync response");
                }
            }
            WireMessage::MessageBatch { messages } => {
                session.messages_received += messages.len() as u64;
                let peer = session.endpoint().clone();
                self.pipeline.ingest_batch(&peer, messages).await;
            }
            WireMessage::ChatMessage(message) => {
                session.messages_received += 1;
                let peer = session.endpoint().clone();
                if let Err(e) = self
                    .pipeline
                    .ingest_chat_message(&peer, message, payload)
                    .await
                {
                    tracing::warn!(peer = %peer, error = %e, "failed to ingest chat message");
                }
            }
        }
    }

    fn emit(&self, event: NodeEvent) {
        let _ = self.events.send(event);
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cruise_mesh_store::MemoryStore;
    use cruise_mesh_sync::{MemoryNetwork, MemoryTransport};

    async fn node() -> (MeshNode<MemoryStore, MemoryTransport>, mpsc::UnboundedReceiver<PeerEvent>) {
        let network = MemoryNetwork::new();
        let (transport, events) = network.join("solo").await;
        (MeshNode::new(MemoryStore::new(), transport, NodeConfig::default()), events)
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let (node, events) = node().await;
        assert!(!node.is_running());
        assert!(matches!(node.stop().await, Err(NodeError::NotRunning)));

        node.start(events).unwrap();
        assert!(node.is_running());

        let (_tx, again) = mpsc::unbounded_channel();
        assert!(matches!(node.start(again), Err(NodeError::AlreadyRunning)));

        node.stop().await.unwrap();
        assert!(!node.is_running());
    }

    #[tokio::test]
    async fn test_send_requires_running_node() {
        let (node, _events) = node().await;
        let err = node
            .send_message(Message::new("m1", "hi", "u1", "", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::NotRunning));
        assert_eq!(node.message_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_send_text_uses_username() {
        let (node, events) = node().await;
        node.start(events).unwrap();
        node.set_username("alice").await.unwrap();

        let report = node.send_text("hello", "lobby").await.unwrap();
        assert_eq!(report.delivered, 0);

        let listed = node.messages(&TopicId::from("lobby"), 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].sender_id, "alice");
        assert_eq!(listed[0].id, report.id);
    }

    #[tokio::test]
    async fn test_subscriptions_round_trip_through_settings() {
        let (node, _events) = node().await;
        assert_eq!(node.load_subscriptions().await.unwrap(), 0);

        node.subscriptions().subscribe("lobby");
        node.subscriptions().subscribe(TopicId::general());
        node.save_subscriptions().await.unwrap();

        node.subscriptions().clear();
        assert_eq!(node.load_subscriptions().await.unwrap(), 2);
        assert!(node.subscriptions().is_subscribed(&TopicId::from("lobby")));
        assert!(node.subscriptions().is_subscribed(&TopicId::general()));
    }

    #[tokio::test]
    async fn test_connection_failure_is_reported() {
        let (node, _events) = node().await;
        let mut outward = node.events();

        node.handle_peer_event(PeerEvent::ConnectionFailed {
            endpoint: EndpointId::from("far"),
            reason: "rejected".into(),
        })
        .await;

        assert_eq!(
            outward.recv().await.unwrap(),
            NodeEvent::ConnectionFailed {
                endpoint: EndpointId::from("far"),
                reason: "rejected".into(),
            }
        );
        assert!(node.active_sessions().is_empty());
    }
}
