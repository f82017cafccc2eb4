//! Federation error types.

use thiserror::Error;

use rmadmin_state::StateError;

/// Errors that can occur in the federation store.
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("invalid queue path: {0}")]
    InvalidQueue(String),

    #[error("invalid queue policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid paging: {0}")]
    InvalidPaging(String),

    #[error("invalid subcluster id: {0:?}")]
    InvalidSubCluster(String),

    #[error("subcluster not found: {0}")]
    SubClusterNotFound(String),

    #[error("subcluster {0} is deregistered")]
    SubClusterDeregistered(String),

    #[error("invalid application id: {0:?}")]
    InvalidApplication(String),

    #[error("application not found: {0}")]
    ApplicationNotFound(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type FederationResult<T> = Result<T, FederationError>;
