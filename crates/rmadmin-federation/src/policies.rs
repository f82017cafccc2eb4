//! Federation queue policy store.
//!
//! Policies are keyed by `(queue, subcluster)` and stored as JSON in the
//! `queue_policies` table. Saves are upserts; deregistering a subcluster
//! removes its policies in the same transaction that changes its state.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rmadmin_state::{
    GuardedWrite, QueuePath, QueuePolicy, QueuePolicyRecord, StateStore, SubClusterId, SubClusterState, epoch_secs,
};

use crate::error::{FederationError, FederationResult};
use crate::validate::{queue_under, validate_policy, validate_queue, validate_subcluster_id};

/// One entry of a batch save.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicySave {
    pub queue: QueuePath,
    pub subcluster_id: SubClusterId,
    pub policy: QueuePolicy,
}

/// Query filter. All fields are optional; paging is 1-based.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyFilter {
    /// Queue path; matches the queue and its descendants.
    #[serde(default)]
    pub queue: Option<QueuePath>,
    #[serde(default)]
    pub subcluster_id: Option<SubClusterId>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub current_page: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyPage {
    pub policies: Vec<QueuePolicyRecord>,
    pub total_count: usize,
    pub total_pages: usize,
    pub current_page: usize,
    /// Zero when the query was not paged.
    pub page_size: usize,
}

/// What deregistration did to one subcluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeregisterOutcome {
    pub subcluster_id: SubClusterId,
    pub previous_state: SubClusterState,
    pub new_state: SubClusterState,
    pub last_heartbeat: u64,
    pub policies_removed: u32,
}

#[derive(Clone)]
pub struct FederationPolicyStore {
    state: StateStore,
}

impl FederationPolicyStore {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Validate and upsert one policy.
    ///
    /// The subcluster must be registered and not deregistered at the
    /// moment the record is written.
    pub fn save(&self, queue: &str, subcluster_id: &str, policy: QueuePolicy) -> FederationResult<QueuePolicyRecord> {
        validate_queue(queue)?;
        validate_subcluster_id(subcluster_id)?;
        validate_policy(&policy)?;

        let record = QueuePolicyRecord {
            queue: queue.to_string(),
            subcluster_id: subcluster_id.to_string(),
            policy,
            updated_at: epoch_secs(),
        };
        match self.state.put_policy_if_active(&record)? {
            GuardedWrite::Written => {}
            GuardedWrite::UnknownSubCluster => {
                return Err(FederationError::SubClusterNotFound(subcluster_id.to_string()));
            }
            GuardedWrite::Deregistered => {
                return Err(FederationError::SubClusterDeregistered(subcluster_id.to_string()));
            }
        }
        info!(%queue, subcluster = %subcluster_id, "queue policy saved");
        Ok(record)
    }

    /// Save each item on its own. One result per item, in input order.
    pub fn batch_save(&self, items: Vec<PolicySave>) -> Vec<FederationResult<QueuePolicyRecord>> {
        let total = items.len();
        let results: Vec<_> = items
            .into_iter()
            .map(|item| {
                let result = self.save(&item.queue, &item.subcluster_id, item.policy);
                if let Err(e) = &result {
                    warn!(queue = %item.queue, subcluster = %item.subcluster_id, error = %e, "batch item rejected");
                }
                result
            })
            .collect();
        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(total, failed, "queue policy batch saved");
        results
    }

    pub fn get(&self, queue: &str, subcluster_id: &str) -> FederationResult<Option<QueuePolicyRecord>> {
        Ok(self.state.get_policy(subcluster_id, queue)?)
    }

    /// List policies matching the filter, sorted by `(queue, subcluster)`.
    pub fn query(&self, filter: &PolicyFilter) -> FederationResult<PolicyPage> {
        if let Some(queue) = &filter.queue {
            validate_queue(queue)?;
        }
        if filter.page_size == Some(0) {
            return Err(FederationError::InvalidPaging("page_size must be at least 1".to_string()));
        }
        if filter.current_page == Some(0) {
            return Err(FederationError::InvalidPaging("current_page is 1-based".to_string()));
        }

        let mut records = match &filter.subcluster_id {
            Some(id) => self.state.list_policies_for_subcluster(id)?,
            None => self.state.list_policies()?,
        };
        if let Some(prefix) = &filter.queue {
            records.retain(|r| queue_under(&r.queue, prefix));
        }
        records.sort_by(|a, b| (&a.queue, &a.subcluster_id).cmp(&(&b.queue, &b.subcluster_id)));

        let total_count = records.len();
        let current_page = filter.current_page.unwrap_or(1);
        let page = match filter.page_size {
            Some(size) => {
                let policies = records.into_iter().skip((current_page - 1) * size).take(size).collect();
                PolicyPage {
                    policies,
                    total_count,
                    total_pages: total_count.div_ceil(size),
                    current_page,
                    page_size: size,
                }
            }
            None => PolicyPage {
                policies: if current_page == 1 { records } else { Vec::new() },
                total_count,
                total_pages: usize::from(total_count > 0),
                current_page,
                page_size: 0,
            },
        };
        debug!(?filter, total_count, returned = page.policies.len(), "queue policies queried");
        Ok(page)
    }

    /// Deregister one subcluster, or every lost one when `id` is `None`.
    pub fn delete_for_subcluster(&self, id: Option<&str>) -> FederationResult<Vec<DeregisterOutcome>> {
        let targets: Vec<String> = match id {
            Some(id) => {
                let info = self
                    .state
                    .get_subcluster(id)?
                    .ok_or_else(|| FederationError::SubClusterNotFound(id.to_string()))?;
                if info.state == SubClusterState::Deregistered {
                    debug!(subcluster = %id, "already deregistered");
                    return Ok(vec![DeregisterOutcome {
                        subcluster_id: info.id,
                        previous_state: SubClusterState::Deregistered,
                        new_state: SubClusterState::Deregistered,
                        last_heartbeat: info.last_heartbeat,
                        policies_removed: 0,
                    }]);
                }
                vec![info.id]
            }
            None => self
                .state
                .list_subclusters()?
                .into_iter()
                .filter(|info| info.state == SubClusterState::Lost)
                .map(|info| info.id)
                .collect(),
        };

        let mut outcomes = Vec::with_capacity(targets.len());
        for target in targets {
            let Some((previous, removed)) = self.state.deregister_subcluster(&target)? else {
                continue;
            };
            info!(
                subcluster = %target,
                previous = ?previous.state,
                policies_removed = removed,
                "subcluster deregistered"
            );
            outcomes.push(DeregisterOutcome {
                subcluster_id: target,
                previous_state: previous.state,
                new_state: SubClusterState::Deregistered,
                last_heartbeat: previous.last_heartbeat,
                policies_removed: removed,
            });
        }
        Ok(outcomes)
    }
}
