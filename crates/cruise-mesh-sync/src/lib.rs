//! # Cruise Mesh Sync
//!
//! Sync protocol for converging message sets between peers.
//!
//! ## Overview
//!
//! Peers meet over short-lived local links. On every new link both sides run
//! a pull-based anti-entropy handshake (`SyncRequest` → `SyncResponse` →
//! `MessageBatch`); live sends travel as single `ChatMessage` payloads that
//! receivers re-flood to their other neighbours.
//!
//! ## Key Properties
//!
//! - **Idempotent**: applying the same message twice changes nothing
//! - **Commutative**: message order does not affect the final set
//! - **Restartable**: an interrupted handshake simply runs again on reconnect
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cruise_mesh_core::EndpointId;
//! use cruise_mesh_store::MemoryStore;
//! use cruise_mesh_sync::{MemoryNetwork, PeerSession, SyncConfig, SyncEngine};
//!
//! async fn example() -> cruise_mesh_sync::Result<()> {
//!     let network = MemoryNetwork::new();
//!     let (transport, _events) = network.join("phone-a").await;
//!
//!     let engine = SyncEngine::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(transport),
//!         SyncConfig::default(),
//!     );
//!
//!     let mut session = PeerSession::connected(EndpointId::from("phone-b"));
//!     engine.initiate(&mut session).await?;
//!     Ok(())
//! }
//! ```

pub mod convergence;
pub mod error;
pub mod messages;
pub mod protocol;
pub mod session;
pub mod transport;

pub use convergence::{
    compare, compute_state_digest, digest_ids, verify_convergence, ConvergenceResult,
    StateDigest,
};
pub use error::{Result, SyncError};
pub use messages::{WireFormat, WireMessage};
pub use protocol::{missing_ids, SyncConfig, SyncEngine, DEFAULT_KNOWN_IDS_PER_TOPIC};
pub use session::{PeerSession, SessionState};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, PeerEvent, PeerTransport};
