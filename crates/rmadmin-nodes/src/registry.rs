//! Node registry: the set of known compute nodes and their liveness.
//!
//! The admin plane only consumes this: heartbeats are produced by the
//! resource tracker. [`InMemoryNodeRegistry`] is the in-process
//! implementation used by the daemon and by tests.

use std::collections::BTreeSet;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use rmadmin_state::NodeId;

/// Membership change published by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Registered(NodeId),
    Removed(NodeId),
}

/// Authoritative view of cluster membership.
pub trait NodeRegistry: Send + Sync {
    fn list_known_nodes(&self) -> BTreeSet<NodeId>;

    fn is_known(&self, node: &NodeId) -> bool;

    /// Whether the node has heartbeated within the liveness timeout.
    fn is_live(&self, node: &NodeId) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<NodeEvent>;
}

/// Heartbeat-tracking registry kept entirely in memory.
pub struct InMemoryNodeRegistry {
    last_heartbeat: DashMap<NodeId, Instant>,
    /// Nodes silent for longer than this are reported as not live.
    liveness_timeout: Duration,
    events: broadcast::Sender<NodeEvent>,
}

impl InMemoryNodeRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            last_heartbeat: DashMap::new(),
            liveness_timeout: Duration::from_secs(600),
            events,
        }
    }

    /// Set the liveness timeout.
    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    /// Set how many events a slow subscriber may fall behind before it
    /// lags. Receivers subscribed earlier keep the old channel.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        self.events = events;
        self
    }

    /// Register a node (or re-register it). Counts as a heartbeat.
    pub fn register(&self, node: NodeId) {
        let fresh = self.last_heartbeat.insert(node.clone(), Instant::now()).is_none();
        if fresh {
            info!(%node, "node registered");
            // No subscribers is fine.
            let _ = self.events.send(NodeEvent::Registered(node));
        }
    }

    /// Record a heartbeat. Returns false for unknown nodes.
    pub fn heartbeat(&self, node: &NodeId) -> bool {
        match self.last_heartbeat.get_mut(node) {
            Some(mut seen) => {
                *seen = Instant::now();
                debug!(%node, "heartbeat received");
                true
            }
            None => {
                warn!(%node, "heartbeat from unknown node");
                false
            }
        }
    }

    /// Permanently remove a node.
    pub fn remove(&self, node: &NodeId) -> bool {
        let existed = self.last_heartbeat.remove(node).is_some();
        if existed {
            info!(%node, "node removed");
            let _ = self.events.send(NodeEvent::Removed(node.clone()));
        }
        existed
    }
}

impl Default for InMemoryNodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry for InMemoryNodeRegistry {
    fn list_known_nodes(&self) -> BTreeSet<NodeId> {
        self.last_heartbeat.iter().map(|e| e.key().clone()).collect()
    }

    fn is_known(&self, node: &NodeId) -> bool {
        self.last_heartbeat.contains_key(node)
    }

    fn is_live(&self, node: &NodeId) -> bool {
        self.last_heartbeat
            .get(node)
            .is_some_and(|seen| seen.elapsed() <= self.liveness_timeout)
    }

    fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }
}
