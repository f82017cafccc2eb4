//! Feeds node registry membership changes into the node components.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use rmadmin_state::NodeId;

use crate::labels::LabelStore;
use crate::lifecycle::NodeLifecycleManager;
use crate::registry::{NodeEvent, NodeRegistry};
use crate::resources::ResourceOverrideStore;

pub struct NodeEventPump {
    registry: Arc<dyn NodeRegistry>,
    lifecycle: Arc<NodeLifecycleManager>,
    labels: Arc<LabelStore>,
    resources: Arc<ResourceOverrideStore>,
}

impl NodeEventPump {
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        lifecycle: Arc<NodeLifecycleManager>,
        labels: Arc<LabelStore>,
        resources: Arc<ResourceOverrideStore>,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            labels,
            resources,
        }
    }

    /// Apply one membership change.
    pub fn handle(&self, event: &NodeEvent) {
        match event {
            NodeEvent::Registered(node) => {
                self.lifecycle.on_registered(node);
            }
            NodeEvent::Removed(node) => self.drop_node(node),
        }
    }

    fn drop_node(&self, node: &NodeId) {
        self.lifecycle.on_removed(node);
        self.labels.forget_node(node);
        if let Err(e) = self.resources.forget(node) {
            error!(%node, error = %e, "failed to drop resource override of removed node");
        }
    }

    /// Bring the node components in line with the registry.
    ///
    /// Every known node gets a cell. A tracked node the registry no
    /// longer knows was removed while its event was missed, and is
    /// dropped as if the removal had been seen. Returns how many were
    /// dropped.
    pub fn resync(&self) -> usize {
        let known = self.registry.list_known_nodes();
        for node in &known {
            self.lifecycle.on_registered(node);
        }
        let mut dropped = 0;
        for node in self.lifecycle.tracked_nodes().difference(&known) {
            // Re-registered since the listing: its own event will follow.
            if self.registry.is_known(node) {
                continue;
            }
            self.drop_node(node);
            dropped += 1;
        }
        if dropped > 0 {
            info!(dropped, "dropped state of nodes removed during lag");
        }
        dropped
    }

    /// Run until shutdown. `events` should be subscribed before any
    /// registration the pump is expected to see.
    pub async fn run(self, mut events: broadcast::Receiver<NodeEvent>, mut shutdown: watch::Receiver<bool>) {
        self.resync();
        debug!("node event pump starting");

        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => self.handle(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "node event pump lagged, resyncing");
                        self.resync();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("node registry closed its event stream");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    debug!("node event pump shutting down");
                    break;
                }
            }
        }
    }
}
