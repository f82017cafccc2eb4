//! Application → home subcluster bookkeeping.

use tracing::{debug, info};

use rmadmin_state::{ApplicationHomeSubCluster, GuardedWrite, StateStore, epoch_secs};

use crate::error::{FederationError, FederationResult};
use crate::validate::validate_subcluster_id;

#[derive(Clone)]
pub struct ApplicationStore {
    state: StateStore,
}

impl ApplicationStore {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Record an application's home subcluster, replacing any earlier record.
    pub fn add_application(&self, application_id: &str, home: &str) -> FederationResult<ApplicationHomeSubCluster> {
        if application_id.trim().is_empty() {
            return Err(FederationError::InvalidApplication(application_id.to_string()));
        }
        validate_subcluster_id(home)?;
        let record = ApplicationHomeSubCluster {
            application_id: application_id.to_string(),
            home_subcluster: home.to_string(),
            created_at: epoch_secs(),
        };
        match self.state.put_application_if_active(&record)? {
            GuardedWrite::Written => {}
            GuardedWrite::UnknownSubCluster => return Err(FederationError::SubClusterNotFound(home.to_string())),
            GuardedWrite::Deregistered => return Err(FederationError::SubClusterDeregistered(home.to_string())),
        }
        debug!(application = %application_id, %home, "application home recorded");
        Ok(record)
    }

    pub fn get_application(&self, application_id: &str) -> FederationResult<ApplicationHomeSubCluster> {
        self.state
            .get_application(application_id)?
            .ok_or_else(|| FederationError::ApplicationNotFound(application_id.to_string()))
    }

    pub fn delete_federation_application(&self, application_id: &str) -> FederationResult<()> {
        if !self.state.delete_application(application_id)? {
            return Err(FederationError::ApplicationNotFound(application_id.to_string()));
        }
        info!(application = %application_id, "federation application deleted");
        Ok(())
    }
}
