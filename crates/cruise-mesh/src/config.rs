//! Node configuration.

use cruise_mesh_sync::SyncConfig;

/// Default capacity of the outward event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for a [`MeshNode`](crate::MeshNode).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Handshake and wire settings.
    pub sync: SyncConfig,
    /// Events buffered per subscriber before slow subscribers start lagging.
    pub event_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl NodeConfig {
    /// Replace the sync configuration.
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Set the outward event channel capacity (at least 1).
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
