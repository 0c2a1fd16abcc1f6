//! # Cruise Mesh Store
//!
//! Storage abstraction for Cruise Mesh. The sync engine and ingestion pipeline
//! only ever reach messages through the [`MessageStore`] trait; the store alone
//! owns durability.
//!
//! ## Key Types
//!
//! - [`MessageStore`] - Async trait for message persistence
//! - [`SettingsStore`] - Async trait for small local preferences
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`InsertResult`] - Outcome of an insert-if-absent
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cruise_mesh_core::Message;
//! use cruise_mesh_store::{MessageStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("cruise-chat.db").unwrap();
//!
//!     let msg = Message::compose("hello", "alice", "");
//!     let first = store.insert_if_absent(&msg).await.unwrap();
//!     let again = store.insert_if_absent(&msg).await.unwrap();
//!     assert!(first.is_inserted());
//!     assert!(!again.is_inserted());
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Insert-only**: messages are never updated or deleted
//! - **Atomic dedup**: `insert_if_absent` is one check-and-insert, so the same
//!   id racing in from two peer sessions is stored exactly once
//! - **Recency index**: `(topic_id, created_at)` backs the bounded per-topic
//!   id windows used to build sync requests

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{InsertResult, MessageStore, SettingsStore, StoreExt};
