//! Admin gateway: routes each request to the one component that owns it.
//!
//! The gateway holds no domain state of its own besides the HA role. It
//! checks the role, forwards, and hands the owner's result back as is.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rmadmin_config::{ConfigurationSnapshot, GroupMappingService, RefreshCoordinator, RefreshOutcome};
use rmadmin_federation::{
    ApplicationStore, DeregisterOutcome, FederationPolicyStore, PolicyFilter, PolicyPage, PolicySave,
    SubClusterRegistry,
};
use rmadmin_nodes::{
    AttributeMappingMode, DecommissionType, LabelStore, NodeAttribute, NodeLabel, NodeLifecycleManager,
    RefreshNodesSummary, ResourceOverrideStore,
};
use rmadmin_state::{NodeId, QueuePolicy, QueuePolicyRecord, ResourceOption};

use crate::error::{AdminError, AdminResult};
use crate::request::{AdminRequest, AdminResponse, ItemResult};

/// High-availability role of this instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaState {
    Active,
    Standby,
}

/// Per-node outcome list, in request order.
pub type NodeOutcomes = Vec<(NodeId, AdminResult<()>)>;

/// The resource manager administration operations.
pub trait ResourceManagerAdmin: Send + Sync {
    fn refresh_queues(&self) -> AdminResult<RefreshOutcome>;

    fn refresh_nodes(&self, mode: DecommissionType, timeout: Option<Duration>) -> AdminResult<RefreshNodesSummary>;

    fn refresh_super_user_groups_configuration(&self) -> AdminResult<RefreshOutcome>;

    fn refresh_user_to_groups_mappings(&self) -> AdminResult<RefreshOutcome>;

    fn refresh_admin_acls(&self) -> AdminResult<RefreshOutcome>;

    fn refresh_service_acls(&self) -> AdminResult<RefreshOutcome>;

    fn update_node_resource(&self, updates: Vec<(NodeId, Option<ResourceOption>)>) -> AdminResult<NodeOutcomes>;

    /// Apply the `dynamic-resources` configuration document.
    fn refresh_nodes_resources(&self) -> AdminResult<usize>;

    fn add_to_cluster_node_labels(&self, labels: &[NodeLabel]) -> AdminResult<()>;

    fn remove_from_cluster_node_labels(&self, labels: &[String]) -> AdminResult<()>;

    fn replace_labels_on_node(
        &self,
        nodes: Vec<(NodeId, BTreeSet<String>)>,
        fail_on_unknown_nodes: bool,
    ) -> NodeOutcomes;

    fn check_for_decommissioning_nodes(&self) -> BTreeSet<NodeId>;

    fn refresh_cluster_max_priority(&self) -> AdminResult<RefreshOutcome>;

    fn map_attributes_to_nodes(&self, nodes: Vec<(NodeId, Vec<NodeAttribute>)>, mode: AttributeMappingMode)
    -> NodeOutcomes;

    fn deregister_sub_cluster(&self, subcluster_id: Option<&str>) -> AdminResult<Vec<DeregisterOutcome>>;

    fn save_federation_queue_policy(
        &self,
        queue: &str,
        subcluster_id: &str,
        policy: QueuePolicy,
    ) -> AdminResult<QueuePolicyRecord>;

    fn batch_save_federation_queue_policies(&self, items: Vec<PolicySave>) -> Vec<AdminResult<QueuePolicyRecord>>;

    fn list_federation_queue_policies(&self, filter: &PolicyFilter) -> AdminResult<PolicyPage>;

    fn delete_federation_application(&self, application_id: &str) -> AdminResult<()>;
}

/// User → group lookups.
pub trait GetUserMappings: Send + Sync {
    fn groups_for_user(&self, user: &str) -> Vec<String>;
}

/// Everything the gateway forwards to.
pub struct AdminComponents {
    pub refresh: Arc<RefreshCoordinator>,
    pub groups: Arc<dyn GroupMappingService>,
    pub labels: Arc<LabelStore>,
    pub lifecycle: Arc<NodeLifecycleManager>,
    pub resources: Arc<ResourceOverrideStore>,
    pub policies: FederationPolicyStore,
    pub subclusters: SubClusterRegistry,
    pub applications: ApplicationStore,
}

pub struct AdminGateway {
    components: AdminComponents,
    standby: AtomicBool,
}

impl AdminGateway {
    /// A new gateway starts `Active`.
    pub fn new(components: AdminComponents) -> Self {
        Self {
            components,
            standby: AtomicBool::new(false),
        }
    }

    pub fn with_ha_state(self, state: HaState) -> Self {
        self.standby.store(state == HaState::Standby, Ordering::Release);
        self
    }

    pub fn ha_state(&self) -> HaState {
        if self.standby.load(Ordering::Acquire) {
            HaState::Standby
        } else {
            HaState::Active
        }
    }

    pub fn transition_to_active(&self) {
        if self.standby.swap(false, Ordering::AcqRel) {
            info!("transitioned to active");
        }
    }

    pub fn transition_to_standby(&self) {
        if !self.standby.swap(true, Ordering::AcqRel) {
            info!("transitioned to standby");
        }
    }

    fn ensure_active(&self, operation: &'static str) -> AdminResult<()> {
        if self.standby.load(Ordering::Acquire) {
            warn!(operation, "rejected on standby instance");
            return Err(AdminError::Standby(operation));
        }
        Ok(())
    }

    pub fn components(&self) -> &AdminComponents {
        &self.components
    }

    /// The configuration snapshot in effect right now.
    pub fn snapshot(&self) -> Arc<ConfigurationSnapshot> {
        self.components.refresh.snapshot().current()
    }

    pub fn subclusters(&self) -> &SubClusterRegistry {
        &self.components.subclusters
    }

    /// Run one typed request.
    pub fn dispatch(&self, request: AdminRequest) -> AdminResult<AdminResponse> {
        let operation = request.operation();
        debug!(operation, "admin request");
        let result = self.route(request);
        match &result {
            Ok(_) => info!(operation, "admin request completed"),
            Err(e) => warn!(operation, kind = ?e.kind(), error = %e, "admin request failed"),
        }
        result
    }

    fn route(&self, request: AdminRequest) -> AdminResult<AdminResponse> {
        let response = match request {
            AdminRequest::RefreshQueues => AdminResponse::Refreshed(self.refresh_queues()?),
            AdminRequest::RefreshNodes {
                decommission_type,
                timeout_secs,
            } => AdminResponse::NodesRefreshed(
                self.refresh_nodes(decommission_type, timeout_secs.map(Duration::from_secs))?,
            ),
            AdminRequest::RefreshSuperUserGroupsConfiguration => {
                AdminResponse::Refreshed(self.refresh_super_user_groups_configuration()?)
            }
            AdminRequest::RefreshUserToGroupsMappings => {
                AdminResponse::Refreshed(self.refresh_user_to_groups_mappings()?)
            }
            AdminRequest::RefreshAdminAcls => AdminResponse::Refreshed(self.refresh_admin_acls()?),
            AdminRequest::RefreshServiceAcls => AdminResponse::Refreshed(self.refresh_service_acls()?),
            AdminRequest::UpdateNodeResource { nodes } => {
                let updates = nodes.into_iter().map(|u| (u.node, u.resource)).collect();
                node_items(self.update_node_resource(updates)?)
            }
            AdminRequest::RefreshNodesResources => AdminResponse::NodeResourcesRefreshed {
                nodes: self.refresh_nodes_resources()?,
            },
            AdminRequest::AddToClusterNodeLabels { labels } => {
                self.add_to_cluster_node_labels(&labels)?;
                AdminResponse::Ack
            }
            AdminRequest::RemoveFromClusterNodeLabels { labels } => {
                self.remove_from_cluster_node_labels(&labels)?;
                AdminResponse::Ack
            }
            AdminRequest::ReplaceLabelsOnNode {
                nodes,
                fail_on_unknown_nodes,
            } => {
                let nodes = nodes.into_iter().map(|u| (u.node, u.labels)).collect();
                node_items(self.replace_labels_on_node(nodes, fail_on_unknown_nodes))
            }
            AdminRequest::CheckForDecommissioningNodes => {
                AdminResponse::DecommissioningNodes(self.check_for_decommissioning_nodes())
            }
            AdminRequest::RefreshClusterMaxPriority => AdminResponse::Refreshed(self.refresh_cluster_max_priority()?),
            AdminRequest::MapAttributesToNodes { mode, nodes } => {
                let nodes = nodes.into_iter().map(|u| (u.node, u.attributes)).collect();
                node_items(self.map_attributes_to_nodes(nodes, mode))
            }
            AdminRequest::DeregisterSubCluster { subcluster_id } => {
                AdminResponse::Deregistered(self.deregister_sub_cluster(subcluster_id.as_deref())?)
            }
            AdminRequest::SaveFederationQueuePolicy {
                queue,
                subcluster_id,
                policy,
            } => AdminResponse::PolicySaved(self.save_federation_queue_policy(&queue, &subcluster_id, policy)?),
            AdminRequest::BatchSaveFederationQueuePolicies { items } => {
                let keys: Vec<String> = items
                    .iter()
                    .map(|i| format!("{}@{}", i.queue, i.subcluster_id))
                    .collect();
                let results = self.batch_save_federation_queue_policies(items);
                AdminResponse::Items(
                    keys.into_iter()
                        .zip(results.iter())
                        .map(|(key, result)| ItemResult::from_result(key, result))
                        .collect(),
                )
            }
            AdminRequest::ListFederationQueuePolicies { filter } => {
                AdminResponse::Policies(self.list_federation_queue_policies(&filter)?)
            }
            AdminRequest::DeleteFederationApplication { application_id } => {
                self.delete_federation_application(&application_id)?;
                AdminResponse::Ack
            }
            AdminRequest::GetGroupsForUser { user } => AdminResponse::Groups(self.groups_for_user(&user)),
            AdminRequest::TransitionToActive => {
                self.transition_to_active();
                AdminResponse::ServiceState(self.ha_state())
            }
            AdminRequest::TransitionToStandby => {
                self.transition_to_standby();
                AdminResponse::ServiceState(self.ha_state())
            }
        };
        Ok(response)
    }
}

fn node_items(outcomes: NodeOutcomes) -> AdminResponse {
    AdminResponse::Items(
        outcomes
            .iter()
            .map(|(node, result)| ItemResult::from_result(node.to_string(), result))
            .collect(),
    )
}

fn lift(outcomes: Vec<(NodeId, rmadmin_nodes::NodeResult<()>)>) -> NodeOutcomes {
    outcomes
        .into_iter()
        .map(|(node, result)| (node, result.map_err(AdminError::from)))
        .collect()
}

impl ResourceManagerAdmin for AdminGateway {
    fn refresh_queues(&self) -> AdminResult<RefreshOutcome> {
        self.ensure_active("refresh_queues")?;
        Ok(self.components.refresh.refresh_queues()?)
    }

    fn refresh_nodes(&self, mode: DecommissionType, timeout: Option<Duration>) -> AdminResult<RefreshNodesSummary> {
        self.ensure_active("refresh_nodes")?;
        Ok(self.components.lifecycle.refresh_nodes(mode, timeout)?)
    }

    fn refresh_super_user_groups_configuration(&self) -> AdminResult<RefreshOutcome> {
        self.ensure_active("refresh_super_user_groups_configuration")?;
        Ok(self.components.refresh.refresh_super_user_groups()?)
    }

    fn refresh_user_to_groups_mappings(&self) -> AdminResult<RefreshOutcome> {
        self.ensure_active("refresh_user_to_groups_mappings")?;
        Ok(self.components.refresh.refresh_user_to_groups_mappings()?)
    }

    fn refresh_admin_acls(&self) -> AdminResult<RefreshOutcome> {
        Ok(self.components.refresh.refresh_admin_acls()?)
    }

    fn refresh_service_acls(&self) -> AdminResult<RefreshOutcome> {
        Ok(self.components.refresh.refresh_service_acls()?)
    }

    fn update_node_resource(&self, updates: Vec<(NodeId, Option<ResourceOption>)>) -> AdminResult<NodeOutcomes> {
        Ok(lift(self.components.resources.update_node_resource(updates)?))
    }

    fn refresh_nodes_resources(&self) -> AdminResult<usize> {
        let resources = self.components.refresh.load_dynamic_resources()?;
        Ok(self.components.resources.refresh_nodes_resources(resources)?)
    }

    fn add_to_cluster_node_labels(&self, labels: &[NodeLabel]) -> AdminResult<()> {
        Ok(self.components.labels.add_labels(labels)?)
    }

    fn remove_from_cluster_node_labels(&self, labels: &[String]) -> AdminResult<()> {
        Ok(self.components.labels.remove_labels(labels)?)
    }

    fn replace_labels_on_node(
        &self,
        nodes: Vec<(NodeId, BTreeSet<String>)>,
        fail_on_unknown_nodes: bool,
    ) -> NodeOutcomes {
        lift(self.components.labels.replace_node_labels(nodes, fail_on_unknown_nodes))
    }

    fn check_for_decommissioning_nodes(&self) -> BTreeSet<NodeId> {
        self.components.lifecycle.check_for_decommissioning_nodes()
    }

    fn refresh_cluster_max_priority(&self) -> AdminResult<RefreshOutcome> {
        Ok(self.components.refresh.refresh_cluster_max_priority()?)
    }

    fn map_attributes_to_nodes(
        &self,
        nodes: Vec<(NodeId, Vec<NodeAttribute>)>,
        mode: AttributeMappingMode,
    ) -> NodeOutcomes {
        lift(self.components.labels.map_attributes(nodes, mode))
    }

    fn deregister_sub_cluster(&self, subcluster_id: Option<&str>) -> AdminResult<Vec<DeregisterOutcome>> {
        Ok(self.components.policies.delete_for_subcluster(subcluster_id)?)
    }

    fn save_federation_queue_policy(
        &self,
        queue: &str,
        subcluster_id: &str,
        policy: QueuePolicy,
    ) -> AdminResult<QueuePolicyRecord> {
        Ok(self.components.policies.save(queue, subcluster_id, policy)?)
    }

    fn batch_save_federation_queue_policies(&self, items: Vec<PolicySave>) -> Vec<AdminResult<QueuePolicyRecord>> {
        self.components
            .policies
            .batch_save(items)
            .into_iter()
            .map(|r| r.map_err(AdminError::from))
            .collect()
    }

    fn list_federation_queue_policies(&self, filter: &PolicyFilter) -> AdminResult<PolicyPage> {
        Ok(self.components.policies.query(filter)?)
    }

    fn delete_federation_application(&self, application_id: &str) -> AdminResult<()> {
        Ok(self.components.applications.delete_federation_application(application_id)?)
    }
}

impl GetUserMappings for AdminGateway {
    fn groups_for_user(&self, user: &str) -> Vec<String> {
        self.components.groups.groups_for_user(user)
    }
}
