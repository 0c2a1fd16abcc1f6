//! Error types for the sync module.

use thiserror::Error;

use cruise_mesh_core::EndpointId;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Peer is not connected.
    #[error("peer not connected: {0}")]
    PeerNotConnected(EndpointId),

    /// A broadcast did not reach every peer it was addressed to.
    #[error("delivery failed to {} peer(s), delivered to {delivered}", failed.len())]
    DeliveryFailed {
        /// Peers that received the payload.
        delivered: usize,
        /// Peers the payload could not be sent to.
        failed: Vec<EndpointId>,
    },

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] cruise_mesh_store::StoreError),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
