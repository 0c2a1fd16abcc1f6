//! # Cruise Mesh
//!
//! Offline peer-to-peer chat replication.
//!
//! ## Overview
//!
//! Devices that meet over short-lived local links converge on the same set
//! of chat messages without any server:
//!
//! - **Anti-entropy**: every new link runs a pull-based set reconciliation
//! - **Flooding**: live messages are re-sent to every neighbour except the
//!   one they came from
//! - **Deduplication**: storage is insert-only and keyed by message id
//! - **Notifications**: at most one per subscribed topic per delivery
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cruise_mesh::{MeshNode, NodeConfig, NodeEvent};
//! use cruise_mesh::store::SqliteStore;
//! use cruise_mesh::sync::MemoryNetwork;
//!
//! async fn example() -> cruise_mesh::Result<()> {
//!     let store = SqliteStore::open("cruise-chat.db")?;
//!     let network = MemoryNetwork::new();
//!     let (transport, peer_events) = network.join("phone-a").await;
//!
//!     let node = MeshNode::new(store, transport, NodeConfig::default());
//!     node.load_subscriptions().await?;
//!     node.start(peer_events)?;
//!
//!     let mut events = node.events();
//!     while let Ok(event) = events.recv().await {
//!         if let NodeEvent::NewMessages { count, total } = event {
//!             println!("{} new, {} total", count, total);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `cruise_mesh::core` - Messages and identifiers
//! - `cruise_mesh::store` - Storage abstraction, SQLite and in-memory stores
//! - `cruise_mesh::sync` - Wire protocol, transport and handshake

pub mod config;
pub mod error;
pub mod events;
pub mod ingest;
pub mod node;
pub mod subscriptions;

// Re-export component crates
pub use cruise_mesh_core as core;
pub use cruise_mesh_store as store;
pub use cruise_mesh_sync as sync;

pub use config::{NodeConfig, DEFAULT_EVENT_CAPACITY};
pub use error::{NodeError, Result};
pub use events::{LogNotificationSink, NodeEvent, Notification, NotificationSink};
pub use ingest::{IngestPipeline, IngestReport, SendReport};
pub use node::{MeshNode, SUBSCRIPTIONS_KEY, USERNAME_KEY};
pub use subscriptions::SubscriptionRegistry;

pub use cruise_mesh_core::{EndpointId, Message, MessageId, Timestamp, TopicId};
