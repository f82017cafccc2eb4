//! Typed admin requests and responses.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use rmadmin_config::RefreshOutcome;
use rmadmin_federation::{DeregisterOutcome, PolicyFilter, PolicyPage, PolicySave};
use rmadmin_nodes::{AttributeMappingMode, DecommissionType, NodeAttribute, NodeLabel, RefreshNodesSummary};
use rmadmin_state::{NodeId, QueuePolicy, QueuePolicyRecord, ResourceOption};

use crate::error::{AdminError, ErrorKind};
use crate::gateway::HaState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResourceUpdate {
    pub node: NodeId,
    /// `None` clears the override.
    #[serde(default)]
    pub resource: Option<ResourceOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLabelsUpdate {
    pub node: NodeId,
    #[serde(default)]
    pub labels: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttributesUpdate {
    pub node: NodeId,
    #[serde(default)]
    pub attributes: Vec<NodeAttribute>,
}

/// Every operation the gateway accepts, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AdminRequest {
    RefreshQueues,
    RefreshNodes {
        #[serde(default)]
        decommission_type: DecommissionType,
        /// Grace period for graceful decommissioning.
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    RefreshSuperUserGroupsConfiguration,
    RefreshUserToGroupsMappings,
    RefreshAdminAcls,
    RefreshServiceAcls,
    UpdateNodeResource {
        nodes: Vec<NodeResourceUpdate>,
    },
    RefreshNodesResources,
    AddToClusterNodeLabels {
        labels: Vec<NodeLabel>,
    },
    RemoveFromClusterNodeLabels {
        labels: Vec<String>,
    },
    ReplaceLabelsOnNode {
        nodes: Vec<NodeLabelsUpdate>,
        #[serde(default)]
        fail_on_unknown_nodes: bool,
    },
    CheckForDecommissioningNodes,
    RefreshClusterMaxPriority,
    MapAttributesToNodes {
        mode: AttributeMappingMode,
        nodes: Vec<NodeAttributesUpdate>,
    },
    DeregisterSubCluster {
        #[serde(default)]
        subcluster_id: Option<String>,
    },
    SaveFederationQueuePolicy {
        queue: String,
        subcluster_id: String,
        policy: QueuePolicy,
    },
    BatchSaveFederationQueuePolicies {
        items: Vec<PolicySave>,
    },
    ListFederationQueuePolicies {
        #[serde(flatten)]
        filter: PolicyFilter,
    },
    DeleteFederationApplication {
        application_id: String,
    },
    GetGroupsForUser {
        user: String,
    },
    TransitionToActive,
    TransitionToStandby,
}

impl AdminRequest {
    /// Wire name of the operation.
    pub fn operation(&self) -> &'static str {
        match self {
            AdminRequest::RefreshQueues => "refresh_queues",
            AdminRequest::RefreshNodes { .. } => "refresh_nodes",
            AdminRequest::RefreshSuperUserGroupsConfiguration => "refresh_super_user_groups_configuration",
            AdminRequest::RefreshUserToGroupsMappings => "refresh_user_to_groups_mappings",
            AdminRequest::RefreshAdminAcls => "refresh_admin_acls",
            AdminRequest::RefreshServiceAcls => "refresh_service_acls",
            AdminRequest::UpdateNodeResource { .. } => "update_node_resource",
            AdminRequest::RefreshNodesResources => "refresh_nodes_resources",
            AdminRequest::AddToClusterNodeLabels { .. } => "add_to_cluster_node_labels",
            AdminRequest::RemoveFromClusterNodeLabels { .. } => "remove_from_cluster_node_labels",
            AdminRequest::ReplaceLabelsOnNode { .. } => "replace_labels_on_node",
            AdminRequest::CheckForDecommissioningNodes => "check_for_decommissioning_nodes",
            AdminRequest::RefreshClusterMaxPriority => "refresh_cluster_max_priority",
            AdminRequest::MapAttributesToNodes { .. } => "map_attributes_to_nodes",
            AdminRequest::DeregisterSubCluster { .. } => "deregister_sub_cluster",
            AdminRequest::SaveFederationQueuePolicy { .. } => "save_federation_queue_policy",
            AdminRequest::BatchSaveFederationQueuePolicies { .. } => "batch_save_federation_queue_policies",
            AdminRequest::ListFederationQueuePolicies { .. } => "list_federation_queue_policies",
            AdminRequest::DeleteFederationApplication { .. } => "delete_federation_application",
            AdminRequest::GetGroupsForUser { .. } => "get_groups_for_user",
            AdminRequest::TransitionToActive => "transition_to_active",
            AdminRequest::TransitionToStandby => "transition_to_standby",
        }
    }
}

/// Outcome of one item in a batch call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    /// Identity of the item: node id, or `queue@subcluster` for policies.
    pub key: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemResult {
    pub fn from_result<T>(key: impl Into<String>, result: &Result<T, AdminError>) -> Self {
        match result {
            Ok(_) => Self {
                key: key.into(),
                success: true,
                kind: None,
                error: None,
            },
            Err(e) => Self {
                key: key.into(),
                success: false,
                kind: Some(e.kind()),
                error: Some(e.to_string()),
            },
        }
    }
}

/// Successful gateway reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "data", rename_all = "snake_case")]
pub enum AdminResponse {
    Ack,
    Refreshed(RefreshOutcome),
    NodesRefreshed(RefreshNodesSummary),
    NodeResourcesRefreshed { nodes: usize },
    Items(Vec<ItemResult>),
    DecommissioningNodes(BTreeSet<NodeId>),
    PolicySaved(QueuePolicyRecord),
    Policies(PolicyPage),
    Deregistered(Vec<DeregisterOutcome>),
    Groups(Vec<String>),
    ServiceState(HaState),
}
