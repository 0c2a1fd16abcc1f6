//! # Cruise Mesh Core
//!
//! Pure data model for Cruise Mesh: chat messages and the identifiers that
//! partition and address them.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Message`] - An immutable chat message, the unit of replication
//! - [`MessageId`] - Globally unique id assigned by the originating node
//! - [`TopicId`] - Chat room identifier; the empty topic is "General"
//! - [`EndpointId`] - Transport-assigned identifier of a connected peer
//!
//! ## Immutability
//!
//! Once stored, a message with a given id is never mutated or deleted.
//! Replicas converge by exchanging ids and inserting what they lack.

pub mod error;
pub mod message;
pub mod types;

pub use error::{CoreError, Result};
pub use message::Message;
pub use types::{now_millis, EndpointId, MessageId, Timestamp, TopicId, MESSAGE_ID_LEN};
