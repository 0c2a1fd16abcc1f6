//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use cruise_mesh::{MeshNode, NodeConfig, Notification, NotificationSink};
use cruise_mesh_core::{EndpointId, Message, MessageId, Timestamp, TopicId};
use cruise_mesh_store::{
    InsertResult, MemoryStore, MessageStore, SettingsStore, StoreError,
};
use cruise_mesh_sync::{
    MemoryNetwork, MemoryTransport, PeerTransport, SyncError, WireFormat, WireMessage,
};

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build a message with predictable content.
pub fn message(id: &str, topic: &str, created_at: Timestamp) -> Message {
    Message::new(id, format!("content of {}", id), "tester", topic, created_at)
}

/// Build one message per id in the general topic, timestamped by position.
pub fn messages(ids: &[&str]) -> Vec<Message> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| message(id, "", 1_000 + i as Timestamp))
        .collect()
}

/// Collect string ids into a set.
pub fn id_set(ids: &[&str]) -> HashSet<MessageId> {
    ids.iter().map(|id| MessageId::from(*id)).collect()
}

/// Install a test-friendly tracing subscriber. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Poll `check` until it returns true, panicking after five seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// A transport that records every payload instead of delivering it.
#[derive(Default)]
pub struct RecordingTransport {
    peers: Mutex<BTreeSet<EndpointId>>,
    unreachable: Mutex<HashSet<EndpointId>>,
    sent: Mutex<Vec<(EndpointId, Bytes)>>,
}

impl RecordingTransport {
    /// Create a transport with no peers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport already linked to `peers`.
    pub fn with_peers(peers: &[&str]) -> Self {
        let transport = Self::new();
        for peer in peers {
            transport.add_peer(*peer);
        }
        transport
    }

    /// Link a peer.
    pub fn add_peer(&self, peer: impl Into<EndpointId>) {
        lock(&self.peers).insert(peer.into());
    }

    /// Make every send to `peer` fail.
    pub fn make_unreachable(&self, peer: impl Into<EndpointId>) {
        lock(&self.unreachable).insert(peer.into());
    }

    /// Every payload sent, in order.
    pub fn sent(&self) -> Vec<(EndpointId, Bytes)> {
        lock(&self.sent).clone()
    }

    /// Every payload sent, decoded.
    pub fn sent_messages(&self, format: WireFormat) -> Vec<(EndpointId, WireMessage)> {
        self.sent()
            .into_iter()
            .filter_map(|(peer, bytes)| format.decode(&bytes).ok().map(|m| (peer, m)))
            .collect()
    }
}

#[async_trait]
impl PeerTransport for RecordingTransport {
    async fn send_to(&self, peer: &EndpointId, payload: Bytes) -> cruise_mesh_sync::Result<()> {
        if !lock(&self.peers).contains(peer) {
            return Err(SyncError::PeerNotConnected(peer.clone()));
        }
        if lock(&self.unreachable).contains(peer) {
            return Err(SyncError::Transport(format!("{} unreachable", peer)));
        }
        lock(&self.sent).push((peer.clone(), payload));
        Ok(())
    }

    async fn connected_peers(&self) -> Vec<EndpointId> {
        lock(&self.peers).iter().cloned().collect()
    }

    async fn disconnect(&self, peer: &EndpointId) -> cruise_mesh_sync::Result<()> {
        lock(&self.peers).remove(peer);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Notifications
// ─────────────────────────────────────────────────────────────────────────────

/// A notification sink that keeps everything it was asked to show.
#[derive(Default)]
pub struct RecordingNotificationSink {
    shown: Mutex<Vec<Notification>>,
}

impl RecordingNotificationSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications shown so far, in order.
    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.shown).clone()
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn notify(&self, notification: Notification) {
        lock(&self.shown).push(notification);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

/// A memory store whose inserts can be made to fail.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    failing_ids: Mutex<HashSet<MessageId>>,
    fail_all_inserts: AtomicBool,
}

impl FaultyStore {
    /// Create an empty store with no faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every insert of this id.
    pub fn fail_insert_of(&self, id: impl Into<MessageId>) {
        lock(&self.failing_ids).insert(id.into());
    }

    /// Fail (or stop failing) every insert.
    pub fn fail_all_inserts(&self, fail: bool) {
        self.fail_all_inserts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageStore for FaultyStore {
    async fn insert_if_absent(&self, message: &Message) -> cruise_mesh_store::Result<InsertResult> {
        if self.fail_all_inserts.load(Ordering::SeqCst)
            || lock(&self.failing_ids).contains(&message.id)
        {
            return Err(StoreError::Unavailable(format!("injected fault for {}", message.id)));
        }
        self.inner.insert_if_absent(message).await
    }

    async fn exists(&self, id: &MessageId) -> cruise_mesh_store::Result<bool> {
        self.inner.exists(id).await
    }

    async fn ids_for_topic(
        &self,
        topic: &TopicId,
        limit: usize,
    ) -> cruise_mesh_store::Result<Vec<MessageId>> {
        self.inner.ids_for_topic(topic, limit).await
    }

    async fn topics(&self) -> cruise_mesh_store::Result<Vec<TopicId>> {
        self.inner.topics().await
    }

    async fn all_ids(&self) -> cruise_mesh_store::Result<HashSet<MessageId>> {
        self.inner.all_ids().await
    }

    async fn most_recent_timestamp(
        &self,
        topic: &TopicId,
    ) -> cruise_mesh_store::Result<Option<Timestamp>> {
        self.inner.most_recent_timestamp(topic).await
    }

    async fn count_all(&self) -> cruise_mesh_store::Result<u64> {
        self.inner.count_all().await
    }

    async fn get_by_ids(&self, ids: &[MessageId]) -> cruise_mesh_store::Result<Vec<Message>> {
        self.inner.get_by_ids(ids).await
    }

    async fn messages_for_topic(
        &self,
        topic: &TopicId,
        limit: usize,
    ) -> cruise_mesh_store::Result<Vec<Message>> {
        self.inner.messages_for_topic(topic, limit).await
    }
}

#[async_trait]
impl SettingsStore for FaultyStore {
    async fn get_setting(&self, key: &str) -> cruise_mesh_store::Result<Option<String>> {
        self.inner.get_setting(key).await
    }

    async fn set_setting(&self, key: &str, value: &str) -> cruise_mesh_store::Result<()> {
        self.inner.set_setting(key, value).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Meshes
// ─────────────────────────────────────────────────────────────────────────────

/// A running node on a [`TestMesh`].
pub struct TestNode {
    /// The node's endpoint id.
    pub id: EndpointId,
    /// The node itself, already started.
    pub node: MeshNode<MemoryStore, MemoryTransport>,
    /// Everything the node notified about.
    pub notifications: Arc<RecordingNotificationSink>,
}

impl TestNode {
    /// Ids currently stored on this node.
    pub async fn ids(&self) -> HashSet<MessageId> {
        self.node.store().all_ids().await.unwrap_or_default()
    }

    /// Whether this node stores `id`.
    pub async fn has(&self, id: &str) -> bool {
        self.node
            .store()
            .exists(&MessageId::from(id))
            .await
            .unwrap_or(false)
    }
}

/// An in-memory mesh of nodes whose links tests open and close by hand.
pub struct TestMesh {
    network: Arc<MemoryNetwork>,
    config: NodeConfig,
}

impl Default for TestMesh {
    fn default() -> Self {
        Self::new()
    }
}

impl TestMesh {
    /// Create an empty mesh with default node configuration.
    pub fn new() -> Self {
        Self::with_config(NodeConfig::default())
    }

    /// Create an empty mesh whose nodes use `config`.
    pub fn with_config(config: NodeConfig) -> Self {
        Self {
            network: MemoryNetwork::new(),
            config,
        }
    }

    /// The underlying network.
    pub fn network(&self) -> &Arc<MemoryNetwork> {
        &self.network
    }

    /// Join and start a node holding `seed` messages.
    pub async fn node(&self, name: &str, seed: Vec<Message>) -> TestNode {
        let (transport, events) = self.network.join(name).await;
        let notifications = Arc::new(RecordingNotificationSink::new());
        let node = MeshNode::with_notification_sink(
            MemoryStore::with_messages(seed),
            transport,
            self.config.clone(),
            Arc::clone(&notifications) as Arc<dyn NotificationSink>,
        );
        if let Err(e) = node.start(events) {
            panic!("failed to start {}: {}", name, e);
        }

        TestNode {
            id: EndpointId::from(name),
            node,
            notifications,
        }
    }

    /// Open a link between two nodes.
    pub async fn connect(&self, a: &TestNode, b: &TestNode) {
        if let Err(e) = self.network.connect(&a.id, &b.id).await {
            panic!("failed to connect {} and {}: {}", a.id, b.id, e);
        }
    }

    /// Close the link between two nodes.
    pub async fn disconnect(&self, a: &TestNode, b: &TestNode) {
        self.network.disconnect(&a.id, &b.id).await;
    }
}
