//! # Cruise Mesh Testkit
//!
//! Testing utilities for Cruise Mesh.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: recording transport and notification sink, a store with
//!   injectable faults, and an in-memory mesh of running nodes
//! - **Generators**: Proptest strategies for messages and replica pairs
//! - **Helpers**: `eventually` polling and test tracing setup
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use cruise_mesh_testkit::fixtures::{eventually, messages, TestMesh};
//!
//! async fn example() {
//!     let mesh = TestMesh::new();
//!     let a = mesh.node("a", messages(&["1", "2"])).await;
//!     let b = mesh.node("b", messages(&["3"])).await;
//!     mesh.connect(&a, &b).await;
//!
//!     eventually("b has 1", || b.has("1")).await;
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use cruise_mesh_testkit::generators::ReplicaPair;
//!
//! proptest! {
//!     #[test]
//!     fn union_is_symmetric(pair: ReplicaPair) {
//!         let flipped = ReplicaPair { left: pair.right.clone(), right: pair.left.clone() };
//!         prop_assert_eq!(pair.union_ids(), flipped.union_ids());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    eventually, id_set, init_tracing, message, messages, FaultyStore, RecordingNotificationSink,
    RecordingTransport, TestMesh, TestNode,
};
pub use generators::{distinct_messages, message_id, topic_id, ReplicaPair};
