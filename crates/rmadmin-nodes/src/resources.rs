//! Per-node resource overrides.
//!
//! Overrides are written through to the state store and mirrored in a
//! sharded map for reads. They never touch a node's lifecycle state.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, warn};

use rmadmin_state::{NodeId, NodeResourceRecord, ResourceOption, StateStore, epoch_secs};

use crate::error::{NodeError, NodeResult};
use crate::registry::NodeRegistry;

pub struct ResourceOverrideStore {
    store: StateStore,
    registry: Arc<dyn NodeRegistry>,
    overrides: DashMap<NodeId, ResourceOption>,
}

impl ResourceOverrideStore {
    /// Build the store, loading overrides persisted by an earlier run.
    pub fn new(store: StateStore, registry: Arc<dyn NodeRegistry>) -> NodeResult<Self> {
        let overrides = DashMap::new();
        for record in store.list_node_resources()? {
            overrides.insert(record.node, record.option);
        }
        debug!(count = overrides.len(), "resource overrides loaded");
        Ok(Self {
            store,
            registry,
            overrides,
        })
    }

    fn check(&self, node: &NodeId, option: Option<&ResourceOption>) -> NodeResult<()> {
        if !self.registry.is_known(node) {
            return Err(NodeError::UnknownNode(node.clone()));
        }
        if let Some((name, value)) = option.and_then(ResourceOption::first_negative) {
            return Err(NodeError::InvalidResource {
                node: node.clone(),
                reason: format!("{name} = {value} is negative"),
            });
        }
        Ok(())
    }

    /// Persist, then mirror. The map entry stays locked across the store
    /// write so updates to one node reach disk and memory in the same order.
    fn write(&self, node: &NodeId, option: Option<ResourceOption>) -> NodeResult<()> {
        match (self.overrides.entry(node.clone()), option) {
            (Entry::Occupied(mut slot), Some(option)) => {
                self.persist(node, &option)?;
                slot.insert(option);
            }
            (Entry::Vacant(slot), Some(option)) => {
                self.persist(node, &option)?;
                slot.insert(option);
            }
            (Entry::Occupied(slot), None) => {
                self.store.delete_node_resource(node)?;
                slot.remove();
                info!(%node, "resource override cleared");
            }
            (Entry::Vacant(_), None) => {
                self.store.delete_node_resource(node)?;
            }
        }
        Ok(())
    }

    fn persist(&self, node: &NodeId, option: &ResourceOption) -> NodeResult<()> {
        self.store.put_node_resource(&NodeResourceRecord {
            node: node.clone(),
            option: option.clone(),
            updated_at: epoch_secs(),
        })?;
        info!(%node, resources = ?option.resources, "resource override set");
        Ok(())
    }

    /// Set (`Some`) or clear (`None`) overrides node by node.
    ///
    /// Rejected nodes get their error in the outcome list; a store
    /// failure aborts the call.
    pub fn update_node_resource(
        &self,
        requests: Vec<(NodeId, Option<ResourceOption>)>,
    ) -> NodeResult<Vec<(NodeId, NodeResult<()>)>> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for (node, option) in requests {
            if let Err(e) = self.check(&node, option.as_ref()) {
                warn!(%node, error = %e, "resource update rejected");
                outcomes.push((node, Err(e)));
                continue;
            }
            self.write(&node, option)?;
            outcomes.push((node, Ok(())));
        }
        Ok(outcomes)
    }

    /// Apply a full override map. Any unknown node rejects the whole call.
    pub fn refresh_nodes_resources(&self, resources: BTreeMap<NodeId, ResourceOption>) -> NodeResult<usize> {
        for (node, option) in &resources {
            self.check(node, Some(option))?;
        }
        let count = resources.len();
        for (node, option) in resources {
            self.write(&node, Some(option))?;
        }
        info!(count, "node resources refreshed");
        Ok(count)
    }

    pub fn override_for(&self, node: &NodeId) -> Option<ResourceOption> {
        self.overrides.get(node).map(|o| o.clone())
    }

    pub fn overrides(&self) -> BTreeMap<NodeId, ResourceOption> {
        self.overrides
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Drop the override of a node that left the cluster.
    pub fn forget(&self, node: &NodeId) -> NodeResult<()> {
        self.write(node, None)
    }
}
