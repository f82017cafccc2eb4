//! Gateway error taxonomy.
//!
//! Every component error is classified into an [`ErrorKind`], which the
//! HTTP layer maps onto a status code.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rmadmin_config::ConfigError;
use rmadmin_federation::FederationError;
use rmadmin_nodes::NodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    /// Illegal lifecycle move. Absorbed as a no-op, never returned.
    StateTransition,
    Unavailable,
    Standby,
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Federation(#[from] FederationError),

    #[error("{0} is not allowed while this instance is standby")]
    Standby(&'static str),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl AdminError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdminError::Config(e) => match e {
                ConfigError::Missing(_) => ErrorKind::NotFound,
                ConfigError::Unavailable { .. } => ErrorKind::Unavailable,
                ConfigError::Parse { .. } | ConfigError::Invalid { .. } => ErrorKind::Validation,
            },
            AdminError::Node(e) => match e {
                NodeError::InvalidLabel(_)
                | NodeError::InvalidAttribute(_)
                | NodeError::InvalidResource { .. }
                | NodeError::InvalidHosts(_) => ErrorKind::Validation,
                NodeError::LabelNotFound { .. } => ErrorKind::Conflict,
                NodeError::UnknownNode(_) => ErrorKind::NotFound,
                NodeError::HostsUnavailable(_) | NodeError::State(_) => ErrorKind::Unavailable,
            },
            AdminError::Federation(e) => match e {
                FederationError::InvalidQueue(_)
                | FederationError::InvalidPolicy(_)
                | FederationError::InvalidPaging(_)
                | FederationError::InvalidSubCluster(_)
                | FederationError::InvalidApplication(_)
                | FederationError::SubClusterDeregistered(_) => ErrorKind::Validation,
                FederationError::SubClusterNotFound(_) | FederationError::ApplicationNotFound(_) => {
                    ErrorKind::NotFound
                }
                FederationError::State(_) => ErrorKind::Unavailable,
            },
            AdminError::Standby(_) => ErrorKind::Standby,
            AdminError::InvalidRequest(_) => ErrorKind::Validation,
        }
    }
}

pub type AdminResult<T> = Result<T, AdminError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rmadmin_config::ConfigDomain;
    use rmadmin_state::NodeId;

    #[test]
    fn classification() {
        let conflict = AdminError::from(NodeError::LabelNotFound {
            node: NodeId::new("a", 1),
            label: "fast".to_string(),
        });
        assert_eq!(conflict.kind(), ErrorKind::Conflict);

        let missing = AdminError::from(ConfigError::Missing(ConfigDomain::Queues));
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let invalid = AdminError::from(FederationError::InvalidQueue("x".to_string()));
        assert_eq!(invalid.kind(), ErrorKind::Validation);

        assert_eq!(AdminError::Standby("refresh_queues").kind(), ErrorKind::Standby);
    }
}
