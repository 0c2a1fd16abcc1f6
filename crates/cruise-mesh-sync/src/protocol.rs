//! Sync protocol state machine.
//!
//! Implements the pull-based anti-entropy handshake. On every new link both
//! sides advertise what they hold, ask for what they lack and serve what was
//! asked for:
//!
//! ```text
//! Node A                                   Node B
//!   |-------- SyncRequest{ids_A} ---------->|
//!   |<------- SyncRequest{ids_B} -----------|
//!   |<------- SyncResponse{ids_A \ B} ------|
//!   |-------- SyncResponse{ids_B \ A} ----->|
//!   |-------- MessageBatch ---------------->|
//!   |<------- MessageBatch -----------------|
//! ```
//!
//! Nothing is resumed across links. A handshake cut short by a disconnect is
//! simply run again on the next connection.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use cruise_mesh_core::{EndpointId, MessageId};
use cruise_mesh_store::{MessageStore, StoreExt};

use crate::error::{Result, SyncError};
use crate::messages::{WireFormat, WireMessage};
use crate::session::PeerSession;
use crate::transport::PeerTransport;

/// Default number of recent ids per topic advertised in a `SyncRequest`.
pub const DEFAULT_KNOWN_IDS_PER_TOPIC: usize = 100;

/// Configuration for sync behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How many of the most recent ids of each topic go into our snapshot.
    pub known_ids_per_topic: usize,
    /// Payload encoding shared by the whole mesh.
    pub wire_format: WireFormat,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            known_ids_per_topic: DEFAULT_KNOWN_IDS_PER_TOPIC,
            wire_format: WireFormat::Json,
        }
    }
}

impl SyncConfig {
    /// Set the per-topic snapshot size.
    pub fn with_known_ids_per_topic(mut self, limit: usize) -> Self {
        self.known_ids_per_topic = limit;
        self
    }

    /// Set the payload encoding.
    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }
}

/// Ids a peer claims to hold that we do not.
pub fn missing_ids(claimed: &BTreeSet<MessageId>, local: &HashSet<MessageId>) -> BTreeSet<MessageId> {
    claimed
        .iter()
        .filter(|id| !local.contains(*id))
        .cloned()
        .collect()
}

/// The handshake engine shared by all peer sessions of a node.
pub struct SyncEngine<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    config: SyncConfig,
}

impl<S: MessageStore, T: PeerTransport> SyncEngine<S, T> {
    /// Create a new sync engine.
    pub fn new(store: Arc<S>, transport: Arc<T>, config: SyncConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    /// The message store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The peer transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The active configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Decode an inbound payload.
    pub fn decode(&self, payload: &[u8]) -> Result<WireMessage> {
        self.config.wire_format.decode(payload)
    }

    /// Encode and send one message to one peer.
    pub async fn send(&self, peer: &EndpointId, message: &WireMessage) -> Result<()> {
        let payload = self.config.wire_format.encode(message)?;
        self.transport.send_to(peer, payload).await
    }

    /// Our advertised snapshot: the most recent ids of every topic.
    pub async fn known_ids(&self) -> Result<BTreeSet<MessageId>> {
        Ok(self
            .store
            .recent_ids_per_topic(self.config.known_ids_per_topic)
            .await?)
    }

    /// Open the handshake with a newly connected peer.
    ///
    /// Sent even when we hold nothing. Returns how many ids were advertised.
    pub async fn initiate(&self, session: &mut PeerSession) -> Result<usize> {
        ensure_open(session)?;

        let ids = self.known_ids().await?;
        let advertised = ids.len();
        self.send(session.endpoint(), &WireMessage::SyncRequest { ids })
            .await?;

        session.mark_sync_initiated();
        session.requests_sent += 1;
        tracing::info!(peer = %session.endpoint(), advertised, "sync request sent");
        Ok(advertised)
    }

    /// Answer a peer's `SyncRequest` with the ids we lack.
    ///
    /// The response is sent even when nothing is missing.
    pub async fn handle_sync_request(
        &self,
        session: &mut PeerSession,
        claimed: &BTreeSet<MessageId>,
    ) -> Result<BTreeSet<MessageId>> {
        ensure_open(session)?;

        let local = self.store.all_ids().await?;
        let requested_ids = missing_ids(claimed, &local);

        self.send(
            session.endpoint(),
            &WireMessage::SyncResponse {
                requested_ids: requested_ids.clone(),
            },
        )
        .await?;

        session.requests_answered += 1;
        tracing::info!(
            peer = %session.endpoint(),
            claimed = claimed.len(),
            requested = requested_ids.len(),
            "sync request handled"
        );
        Ok(requested_ids)
    }

    /// Serve the messages a peer asked for in its `SyncResponse`.
    ///
    /// An empty request sends nothing. Ids we no longer hold are skipped.
    /// Returns the number of messages served.
    pub async fn handle_sync_response(
        &self,
        session: &mut PeerSession,
        requested: &BTreeSet<MessageId>,
    ) -> Result<usize> {
        ensure_open(session)?;

        if requested.is_empty() {
            tracing::debug!(peer = %session.endpoint(), "peer needs nothing");
            return Ok(0);
        }

        let ids: Vec<MessageId> = requested.iter().cloned().collect();
        let messages = self.store.get_by_ids(&ids).await?;
        if messages.is_empty() {
            tracing::debug!(
                peer = %session.endpoint(),
                requested = ids.len(),
                "none of the requested messages are held"
            );
            return Ok(0);
        }

        let served = messages.len();
        self.send(session.endpoint(), &WireMessage::MessageBatch { messages })
            .await?;

        session.batches_served += 1;
        tracing::info!(
            peer = %session.endpoint(),
            requested = ids.len(),
            served,
            "message batch sent"
        );
        Ok(served)
    }
}

fn ensure_open(session: &PeerSession) -> Result<()> {
    if session.is_open() {
        Ok(())
    } else {
        Err(SyncError::PeerNotConnected(session.endpoint().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::transport::memory::{MemoryNetwork, MemoryTransport};
    use crate::transport::PeerEvent;
    use cruise_mesh_core::Message;
    use cruise_mesh_store::MemoryStore;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Side {
        engine: SyncEngine<MemoryStore, MemoryTransport>,
        events: UnboundedReceiver<PeerEvent>,
        session: PeerSession,
    }

    fn msg(id: &str) -> Message {
        Message::new(id, format!("content {}", id), "u1", "", id.len() as i64)
    }

    fn ids(raw: &[&str]) -> BTreeSet<MessageId> {
        raw.iter().map(|s| MessageId::from(*s)).collect()
    }

    async fn pair(a_ids: &[&str], b_ids: &[&str]) -> (Side, Side) {
        let network = MemoryNetwork::new();
        let (ta, mut ea) = network.join("a").await;
        let (tb, mut eb) = network.join("b").await;
        network
            .connect(&EndpointId::from("a"), &EndpointId::from("b"))
            .await
            .unwrap();
        ea.recv().await.unwrap();
        eb.recv().await.unwrap();

        let side = |ids: &[&str], t, events, peer: &str| Side {
            engine: SyncEngine::new(
                Arc::new(MemoryStore::with_messages(ids.iter().map(|id| msg(id)))),
                Arc::new(t),
                SyncConfig::default(),
            ),
            events,
            session: PeerSession::connected(EndpointId::from(peer)),
        };

        (side(a_ids, ta, ea, "b"), side(b_ids, tb, eb, "a"))
    }

    async fn next_message(side: &mut Side) -> WireMessage {
        match side.events.recv().await {
            Some(PeerEvent::Payload { bytes, .. }) => side.engine.decode(&bytes).unwrap(),
            other => panic!("expected payload, got {:?}", other),
        }
    }

    async fn store_batch(side: &Side, message: WireMessage) {
        let messages = match message {
            WireMessage::MessageBatch { messages } => messages,
            other => panic!("expected batch, got {:?}", other),
        };
        for m in &messages {
            side.engine.store().insert_if_absent(m).await.unwrap();
        }
    }

    #[test]
    fn test_missing_ids() {
        let local: HashSet<MessageId> = ids(&["2", "3"]).into_iter().collect();
        assert_eq!(missing_ids(&ids(&["1", "2", "3"]), &local), ids(&["1"]));
        assert!(missing_ids(&BTreeSet::new(), &local).is_empty());
    }

    #[tokio::test]
    async fn test_reconciliation_both_directions() {
        let (mut a, mut b) = pair(&["1", "2", "3"], &["2", "3", "4"]).await;

        a.engine.initiate(&mut a.session).await.unwrap();
        b.engine.initiate(&mut b.session).await.unwrap();
        assert_eq!(a.session.state(), SessionState::SyncInitiated);

        // B answers A's request; A answers B's.
        let WireMessage::SyncRequest { ids: from_a } = next_message(&mut b).await else {
            panic!("expected sync request");
        };
        assert_eq!(from_a, ids(&["1", "2", "3"]));
        let b_wants = b.engine.handle_sync_request(&mut b.session, &from_a).await.unwrap();
        assert_eq!(b_wants, ids(&["1"]));

        let WireMessage::SyncRequest { ids: from_b } = next_message(&mut a).await else {
            panic!("expected sync request");
        };
        let a_wants = a.engine.handle_sync_request(&mut a.session, &from_b).await.unwrap();
        assert_eq!(a_wants, ids(&["4"]));

        // Each side serves the other's response.
        let WireMessage::SyncResponse { requested_ids } = next_message(&mut a).await else {
            panic!("expected sync response");
        };
        assert_eq!(a.engine.handle_sync_response(&mut a.session, &requested_ids).await.unwrap(), 1);

        let WireMessage::SyncResponse { requested_ids } = next_message(&mut b).await else {
            panic!("expected sync response");
        };
        assert_eq!(b.engine.handle_sync_response(&mut b.session, &requested_ids).await.unwrap(), 1);

        let batch_for_b = next_message(&mut b).await;
        store_batch(&b, batch_for_b).await;
        let batch_for_a = next_message(&mut a).await;
        store_batch(&a, batch_for_a).await;

        let all: HashSet<MessageId> = ids(&["1", "2", "3", "4"]).into_iter().collect();
        assert_eq!(a.engine.store().all_ids().await.unwrap(), all);
        assert_eq!(b.engine.store().all_ids().await.unwrap(), all);
        assert_eq!(a.session.batches_served, 1);
    }

    #[tokio::test]
    async fn test_empty_request_still_answered() {
        let (mut a, mut b) = pair(&[], &["x"]).await;

        assert_eq!(a.engine.initiate(&mut a.session).await.unwrap(), 0);
        let WireMessage::SyncRequest { ids: claimed } = next_message(&mut b).await else {
            panic!("expected sync request");
        };
        assert!(claimed.is_empty());

        let wanted = b.engine.handle_sync_request(&mut b.session, &claimed).await.unwrap();
        assert!(wanted.is_empty());
        assert_eq!(
            next_message(&mut a).await,
            WireMessage::SyncResponse { requested_ids: BTreeSet::new() }
        );
    }

    #[tokio::test]
    async fn test_empty_response_sends_no_batch() {
        let (mut a, mut b) = pair(&["1"], &[]).await;

        let served = a
            .engine
            .handle_sync_response(&mut a.session, &BTreeSet::new())
            .await
            .unwrap();
        assert_eq!(served, 0);

        // Requested ids we do not hold are skipped as well.
        let served = a
            .engine
            .handle_sync_response(&mut a.session, &ids(&["gone"]))
            .await
            .unwrap();
        assert_eq!(served, 0);
        assert!(b.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_known_ids_bounded_per_topic() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..5 {
            store
                .insert_if_absent(&Message::new(format!("l{}", i), "x", "u", "lobby", i))
                .await
                .unwrap();
            store
                .insert_if_absent(&Message::new(format!("g{}", i), "x", "u", "", i))
                .await
                .unwrap();
        }
        let network = MemoryNetwork::new();
        let (transport, _events) = network.join("solo").await;
        let engine = SyncEngine::new(
            store,
            Arc::new(transport),
            SyncConfig::default().with_known_ids_per_topic(2),
        );

        assert_eq!(engine.known_ids().await.unwrap(), ids(&["g3", "g4", "l3", "l4"]));
    }

    #[tokio::test]
    async fn test_closed_session_sends_nothing() {
        let (mut a, mut b) = pair(&["1"], &[]).await;
        a.session.close();

        let err = a.engine.initiate(&mut a.session).await.unwrap_err();
        assert!(matches!(err, SyncError::PeerNotConnected(_)));
        assert!(b.events.try_recv().is_err());
    }
}
