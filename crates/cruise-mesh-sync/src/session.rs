//! Per-peer session state.
//!
//! A session lives exactly as long as the link to its peer. It is never
//! persisted; a reconnect starts a fresh session and a fresh handshake.

use cruise_mesh_core::{now_millis, EndpointId, Timestamp};

/// Lifecycle of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The transport is still establishing the link.
    Connecting,
    /// The link is up; no handshake sent yet.
    Connected,
    /// Our `SyncRequest` has been sent. Initiator and responder roles run
    /// concurrently from here on.
    SyncInitiated,
    /// Terminal. Anything still in flight is abandoned.
    Disconnected,
}

/// Ephemeral reconciliation and relay state for one connected peer.
#[derive(Debug, Clone)]
pub struct PeerSession {
    endpoint: EndpointId,
    state: SessionState,
    opened_at: Timestamp,

    /// `SyncRequest`s we sent.
    pub requests_sent: u64,
    /// `SyncRequest`s from the peer we answered.
    pub requests_answered: u64,
    /// `MessageBatch`es we served.
    pub batches_served: u64,
    /// Messages the peer delivered to us, new or not.
    pub messages_received: u64,
}

impl PeerSession {
    /// Start a session for a link that is being established.
    pub fn new(endpoint: EndpointId) -> Self {
        Self {
            endpoint,
            state: SessionState::Connecting,
            opened_at: now_millis(),
            requests_sent: 0,
            requests_answered: 0,
            batches_served: 0,
            messages_received: 0,
        }
    }

    /// Start a session for a link that is already up.
    pub fn connected(endpoint: EndpointId) -> Self {
        let mut session = Self::new(endpoint);
        session.state = SessionState::Connected;
        session
    }

    /// The peer this session talks to.
    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// When the session was created.
    pub fn opened_at(&self) -> Timestamp {
        self.opened_at
    }

    /// Whether the session can still send and receive.
    pub fn is_open(&self) -> bool {
        !matches!(self.state, SessionState::Disconnected)
    }

    /// The link came up.
    pub fn mark_connected(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::Connected;
        }
    }

    /// Our handshake went out.
    pub fn mark_sync_initiated(&mut self) {
        if self.is_open() {
            self.state = SessionState::SyncInitiated;
        }
    }

    /// The link went away.
    pub fn close(&mut self) {
        self.state = SessionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let mut session = PeerSession::new(EndpointId::from("peer"));
        assert_eq!(session.state(), SessionState::Connecting);

        session.mark_connected();
        assert_eq!(session.state(), SessionState::Connected);

        session.mark_sync_initiated();
        assert_eq!(session.state(), SessionState::SyncInitiated);

        // Reconnect notifications never move a session backwards.
        session.mark_connected();
        assert_eq!(session.state(), SessionState::SyncInitiated);

        session.close();
        assert!(!session.is_open());
    }

    #[test]
    fn test_disconnected_is_terminal() {
        let mut session = PeerSession::connected(EndpointId::from("peer"));
        session.close();
        session.mark_connected();
        session.mark_sync_initiated();
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
