//! SubCluster registry: registration, heartbeats, and lost detection.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use rmadmin_state::{StateStore, SubClusterInfo, SubClusterState, epoch_secs};

use crate::error::{FederationError, FederationResult};
use crate::validate::validate_subcluster_id;

fn is_stale(info: &SubClusterInfo, timeout: Duration, now: u64) -> bool {
    info.state == SubClusterState::Running && now.saturating_sub(info.last_heartbeat) > timeout.as_secs()
}

#[derive(Clone)]
pub struct SubClusterRegistry {
    state: StateStore,
}

impl SubClusterRegistry {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Register a subcluster, or bring a deregistered one back.
    pub fn register(&self, id: &str) -> FederationResult<SubClusterInfo> {
        validate_subcluster_id(id)?;
        let now = epoch_secs();
        let info = self.state.update_subcluster(id, |current| {
            Some(match current {
                Some(existing) => SubClusterInfo {
                    state: SubClusterState::Running,
                    registered_at: if existing.state == SubClusterState::Deregistered {
                        now
                    } else {
                        existing.registered_at
                    },
                    last_heartbeat: now,
                    ..existing.clone()
                },
                None => SubClusterInfo {
                    id: id.to_string(),
                    state: SubClusterState::Running,
                    registered_at: now,
                    last_heartbeat: now,
                },
            })
        })?;
        let info = info.ok_or_else(|| FederationError::SubClusterNotFound(id.to_string()))?;
        info!(subcluster = %id, "subcluster registered");
        Ok(info)
    }

    /// Record a heartbeat. A lost subcluster comes back to `Running`;
    /// a deregistered one stays deregistered until it registers again.
    pub fn heartbeat(&self, id: &str) -> FederationResult<SubClusterState> {
        let mut revived = false;
        let after = self.state.update_subcluster(id, |current| {
            let info = current?;
            if info.state == SubClusterState::Deregistered {
                return None;
            }
            revived = info.state == SubClusterState::Lost;
            Some(SubClusterInfo {
                state: SubClusterState::Running,
                last_heartbeat: epoch_secs(),
                ..info.clone()
            })
        })?;
        let Some(info) = after else {
            warn!(subcluster = %id, "heartbeat from unknown subcluster");
            return Err(FederationError::SubClusterNotFound(id.to_string()));
        };
        match info.state {
            SubClusterState::Deregistered => {
                debug!(subcluster = %id, "heartbeat from deregistered subcluster ignored");
            }
            _ if revived => info!(subcluster = %id, "lost subcluster is heartbeating again"),
            _ => {}
        }
        Ok(info.state)
    }

    /// Mark running subclusters whose last heartbeat is older than `timeout` as lost.
    ///
    /// Each candidate is re-read inside its own write, so a heartbeat or
    /// deregistration that commits after the scan wins.
    pub fn mark_lost(&self, timeout: Duration) -> FederationResult<Vec<String>> {
        let mut lost = Vec::new();
        for candidate in self.state.list_subclusters()? {
            if !is_stale(&candidate, timeout, epoch_secs()) {
                continue;
            }
            let mut marked = false;
            self.state.update_subcluster(&candidate.id, |current| {
                let info = current.filter(|info| is_stale(info, timeout, epoch_secs()))?;
                marked = true;
                Some(SubClusterInfo {
                    state: SubClusterState::Lost,
                    ..info.clone()
                })
            })?;
            if marked {
                warn!(subcluster = %candidate.id, last_heartbeat = candidate.last_heartbeat, "subcluster lost");
                lost.push(candidate.id);
            }
        }
        Ok(lost)
    }

    pub fn get(&self, id: &str) -> FederationResult<Option<SubClusterInfo>> {
        Ok(self.state.get_subcluster(id)?)
    }

    pub fn list(&self) -> FederationResult<Vec<SubClusterInfo>> {
        Ok(self.state.list_subclusters()?)
    }

    /// Run `mark_lost` every `interval` until shutdown.
    pub async fn run_lost_sweeper(self, interval: Duration, timeout: Duration, mut shutdown: watch::Receiver<bool>) {
        debug!(?interval, ?timeout, "subcluster sweeper starting");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.mark_lost(timeout) {
                        error!(error = %e, "subcluster sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("subcluster sweeper shutting down");
                    break;
                }
            }
        }
    }
}
