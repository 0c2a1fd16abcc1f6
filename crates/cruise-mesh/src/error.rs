//! Error types for the mesh node.

use thiserror::Error;

use cruise_mesh_core::{CoreError, EndpointId, MessageId};
use cruise_mesh_store::StoreError;
use cruise_mesh_sync::SyncError;

/// Errors returned by [`MeshNode`](crate::MeshNode) operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Invalid message or identifier.
    #[error("invalid input: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Sync or transport error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// A local send reused an id that is already stored.
    #[error("message already exists: {0}")]
    DuplicateMessage(MessageId),

    /// The message was stored locally but did not reach every peer.
    #[error("message {stored} stored but not delivered to {} peer(s)", failed.len())]
    Delivery {
        /// Id of the stored message.
        stored: MessageId,
        /// Peers the message could not be sent to.
        failed: Vec<EndpointId>,
    },

    /// The node has not been started.
    #[error("node is not running")]
    NotRunning,

    /// The node is already running.
    #[error("node is already running")]
    AlreadyRunning,
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
