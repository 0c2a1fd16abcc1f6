//! Transport abstraction for the sync protocol.
//!
//! The transport discovers peers, keeps byte-stream links to them and delivers
//! inbound payloads. It reports everything that happens on its links as a
//! stream of [`PeerEvent`]s; the core only ever sends bytes through
//! [`PeerTransport`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use cruise_mesh_core::EndpointId;

use crate::error::{Result, SyncError};

/// Something that happened on a peer link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A link to the peer is up.
    Connected(EndpointId),
    /// The link to the peer went away.
    Disconnected(EndpointId),
    /// A connection attempt failed.
    ConnectionFailed {
        /// The peer we tried to reach.
        endpoint: EndpointId,
        /// Transport-specific description.
        reason: String,
    },
    /// Bytes arrived from a connected peer.
    Payload {
        /// The sending peer.
        from: EndpointId,
        /// The raw payload.
        bytes: Bytes,
    },
}

/// Outbound side of a peer transport.
///
/// Implementations must be thread-safe (Send + Sync). Send order to a single
/// peer must be preserved.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send a payload to one connected peer.
    async fn send_to(&self, peer: &EndpointId, payload: Bytes) -> Result<()>;

    /// List currently connected peers.
    async fn connected_peers(&self) -> Vec<EndpointId>;

    /// Drop the link to a peer.
    async fn disconnect(&self, peer: &EndpointId) -> Result<()>;

    /// Send a payload to every connected peer except `excluding`.
    ///
    /// Returns the number of peers reached. If any peer could not be reached
    /// the error lists them; the payload has still gone to every other peer.
    async fn broadcast(&self, payload: Bytes, excluding: Option<&EndpointId>) -> Result<usize> {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for peer in self.connected_peers().await {
            if Some(&peer) == excluding {
                continue;
            }
            match self.send_to(&peer, payload.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "broadcast send failed");
                    failed.push(peer);
                }
            }
        }

        if failed.is_empty() {
            Ok(delivered)
        } else {
            Err(SyncError::DeliveryFailed { delivered, failed })
        }
    }
}

#[async_trait]
impl<T: PeerTransport + ?Sized> PeerTransport for Arc<T> {
    async fn send_to(&self, peer: &EndpointId, payload: Bytes) -> Result<()> {
        (**self).send_to(peer, payload).await
    }

    async fn connected_peers(&self) -> Vec<EndpointId> {
        (**self).connected_peers().await
    }

    async fn disconnect(&self, peer: &EndpointId) -> Result<()> {
        (**self).disconnect(peer).await
    }

    async fn broadcast(&self, payload: Bytes, excluding: Option<&EndpointId>) -> Result<usize> {
        (**self).broadcast(payload, excluding).await
    }
}

/// A simple in-memory transport for testing.
///
/// Nodes join a shared [`MemoryNetwork`]; links between them are opened and
/// closed explicitly, so tests decide the mesh topology.
pub mod memory {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use tokio::sync::{mpsc, RwLock};

    #[derive(Default)]
    struct NetworkState {
        /// Event channel of each joined node.
        nodes: HashMap<EndpointId, mpsc::UnboundedSender<PeerEvent>>,
        /// Open links, stored with the smaller endpoint first.
        links: BTreeSet<(EndpointId, EndpointId)>,
    }

    impl NetworkState {
        fn notify(&self, node: &EndpointId, event: PeerEvent) {
            if let Some(tx) = self.nodes.get(node) {
                // A node that stopped listening has effectively left.
                let _ = tx.send(event);
            }
        }
    }

    fn link(a: &EndpointId, b: &EndpointId) -> (EndpointId, EndpointId) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }

    /// Shared state for the memory transport network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        state: RwLock<NetworkState>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Join the network as `endpoint`.
        ///
        /// Returns the node's transport and the receiver its `PeerEvent`s
        /// arrive on. Joining again under the same id replaces the old
        /// channel.
        pub async fn join(
            self: &Arc<Self>,
            endpoint: impl Into<EndpointId>,
        ) -> (MemoryTransport, mpsc::UnboundedReceiver<PeerEvent>) {
            let endpoint = endpoint.into();
            let (tx, rx) = mpsc::unbounded_channel();

            self.state.write().await.nodes.insert(endpoint.clone(), tx);

            let transport = MemoryTransport {
                local: endpoint,
                network: Arc::clone(self),
            };
            (transport, rx)
        }

        /// Open a link between two joined nodes.
        ///
        /// Both sides see `PeerEvent::Connected`. Connecting an already linked
        /// pair is a no-op.
        pub async fn connect(&self, a: &EndpointId, b: &EndpointId) -> Result<()> {
            let mut state = self.state.write().await;
            for node in [a, b] {
                if !state.nodes.contains_key(node) {
                    return Err(SyncError::PeerNotConnected(node.clone()));
                }
            }
            if a == b {
                return Err(SyncError::Transport("cannot link a node to itself".into()));
            }

            if state.links.insert(link(a, b)) {
                state.notify(a, PeerEvent::Connected(b.clone()));
                state.notify(b, PeerEvent::Connected(a.clone()));
            }
            Ok(())
        }

        /// Close the link between two nodes. Both sides see
        /// `PeerEvent::Disconnected`.
        pub async fn disconnect(&self, a: &EndpointId, b: &EndpointId) {
            let mut state = self.state.write().await;
            if state.links.remove(&link(a, b)) {
                state.notify(a, PeerEvent::Disconnected(b.clone()));
                state.notify(b, PeerEvent::Disconnected(a.clone()));
            }
        }

        /// Report a failed connection attempt from `from` to `to`.
        pub async fn fail_connection(
            &self,
            from: &EndpointId,
            to: &EndpointId,
            reason: impl Into<String>,
        ) {
            let state = self.state.read().await;
            state.notify(
                from,
                PeerEvent::ConnectionFailed {
                    endpoint: to.clone(),
                    reason: reason.into(),
                },
            );
        }

        /// Remove a node, closing all of its links.
        pub async fn leave(&self, endpoint: &EndpointId) {
            let mut state = self.state.write().await;
            let dropped: Vec<_> = state
                .links
                .iter()
                .filter(|(a, b)| a == endpoint || b == endpoint)
                .cloned()
                .collect();

            for pair in dropped {
                state.links.remove(&pair);
                let other = if &pair.0 == endpoint { &pair.1 } else { &pair.0 };
                state.notify(other, PeerEvent::Disconnected(endpoint.clone()));
            }
            state.nodes.remove(endpoint);
        }

        async fn peers_of(&self, endpoint: &EndpointId) -> Vec<EndpointId> {
            let state = self.state.read().await;
            state
                .links
                .iter()
                .filter_map(|(a, b)| {
                    if a == endpoint {
                        Some(b.clone())
                    } else if b == endpoint {
                        Some(a.clone())
                    } else {
                        None
                    }
                })
                .collect()
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        local: EndpointId,
        network: Arc<MemoryNetwork>,
    }

    impl MemoryTransport {
        /// The endpoint id this transport sends as.
        pub fn local_id(&self) -> &EndpointId {
            &self.local
        }

        /// The network this transport belongs to.
        pub fn network(&self) -> &Arc<MemoryNetwork> {
            &self.network
        }
    }

    #[async_trait]
    impl PeerTransport for MemoryTransport {
        async fn send_to(&self, peer: &EndpointId, payload: Bytes) -> Result<()> {
            let state = self.network.state.read().await;
            if !state.links.contains(&link(&self.local, peer)) {
                return Err(SyncError::PeerNotConnected(peer.clone()));
            }
            let tx = state
                .nodes
                .get(peer)
                .ok_or_else(|| SyncError::PeerNotConnected(peer.clone()))?;

            tx.send(PeerEvent::Payload {
                from: self.local.clone(),
                bytes: payload,
            })
            .map_err(|_| SyncError::Transport(format!("{} stopped receiving", peer)))
        }

        async fn connected_peers(&self) -> Vec<EndpointId> {
            self.network.peers_of(&self.local).await
        }

        async fn disconnect(&self, peer: &EndpointId) -> Result<()> {
            self.network.disconnect(&self.local, peer).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;

    #[tokio::test]
    async fn test_memory_transport_send_recv() {
        let network = MemoryNetwork::new();
        let a = EndpointId::from("a");
        let b = EndpointId::from("b");

        let (transport_a, mut events_a) = network.join("a").await;
        let (_transport_b, mut events_b) = network.join("b").await;

        network.connect(&a, &b).await.unwrap();
        assert_eq!(events_a.recv().await, Some(PeerEvent::Connected(b.clone())));
        assert_eq!(events_b.recv().await, Some(PeerEvent::Connected(a.clone())));

        transport_a
            .send_to(&b, Bytes::from_static(b"hello"))
            .await
            .unwrap();

        assert_eq!(
            events_b.recv().await,
            Some(PeerEvent::Payload {
                from: a.clone(),
                bytes: Bytes::from_static(b"hello"),
            })
        );
    }

    #[tokio::test]
    async fn test_send_requires_link() {
        let network = MemoryNetwork::new();
        let (transport_a, _events_a) = network.join("a").await;
        let (_transport_b, _events_b) = network.join("b").await;

        let err = transport_a
            .send_to(&EndpointId::from("b"), Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::PeerNotConnected(_)));
    }

    #[tokio::test]
    async fn test_broadcast_skips_excluded_peer() {
        let network = MemoryNetwork::new();
        let (hub, _hub_events) = network.join("hub").await;
        let (_b, mut events_b) = network.join("b").await;
        let (_c, mut events_c) = network.join("c").await;

        let hub_id = EndpointId::from("hub");
        network.connect(&hub_id, &EndpointId::from("b")).await.unwrap();
        network.connect(&hub_id, &EndpointId::from("c")).await.unwrap();
        events_b.recv().await.unwrap();
        events_c.recv().await.unwrap();

        let reached = hub
            .broadcast(Bytes::from_static(b"x"), Some(&EndpointId::from("b")))
            .await
            .unwrap();
        assert_eq!(reached, 1);
        assert!(matches!(events_c.recv().await, Some(PeerEvent::Payload { .. })));
        assert!(events_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_reports_unreachable_peers() {
        let network = MemoryNetwork::new();
        let (hub, _hub_events) = network.join("hub").await;
        let (_b, events_b) = network.join("b").await;
        let (_c, _events_c) = network.join("c").await;

        let hub_id = EndpointId::from("hub");
        network.connect(&hub_id, &EndpointId::from("b")).await.unwrap();
        network.connect(&hub_id, &EndpointId::from("c")).await.unwrap();
        drop(events_b);

        match hub.broadcast(Bytes::from_static(b"x"), None).await {
            Err(SyncError::DeliveryFailed { delivered, failed }) => {
                assert_eq!(delivered, 1);
                assert_eq!(failed, vec![EndpointId::from("b")]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leave_and_failures_are_reported() {
        let network = MemoryNetwork::new();
        let a = EndpointId::from("a");
        let b = EndpointId::from("b");
        let (transport_a, mut events_a) = network.join("a").await;
        let (_transport_b, mut events_b) = network.join("b").await;

        network.fail_connection(&a, &b, "timeout").await;
        assert_eq!(
            events_a.recv().await,
            Some(PeerEvent::ConnectionFailed {
                endpoint: b.clone(),
                reason: "timeout".into(),
            })
        );

        network.connect(&a, &b).await.unwrap();
        events_a.recv().await.unwrap();
        events_b.recv().await.unwrap();
        assert_eq!(transport_a.connected_peers().await, vec![b.clone()]);

        network.leave(&b).await;
        assert_eq!(events_a.recv().await, Some(PeerEvent::Disconnected(b.clone())));
        assert!(transport_a.connected_peers().await.is_empty());
    }
}
