//! Node administration error types.

use thiserror::Error;

use rmadmin_state::NodeId;

/// Errors that can occur while administering compute nodes.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid label: {0}")]
    InvalidLabel(String),

    #[error("label {label} is not in the cluster label vocabulary (node {node})")]
    LabelNotFound { node: NodeId, label: String },

    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("invalid resource for node {node}: {reason}")]
    InvalidResource { node: NodeId, reason: String },

    #[error("node list source unavailable: {0}")]
    HostsUnavailable(String),

    #[error("invalid node list: {0}")]
    InvalidHosts(String),

    #[error("state store error: {0}")]
    State(#[from] rmadmin_state::StateError),
}

pub type NodeResult<T> = Result<T, NodeError>;
