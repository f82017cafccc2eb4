//! Input checks for queue policies and federation ids.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use rmadmin_state::{QueuePolicy, SubClusterId};

use crate::error::{FederationError, FederationResult};

static QUEUE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^root(\.[A-Za-z0-9_\-]+)*$").expect("static regex"));

static SUBCLUSTER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-.]*$").expect("static regex"));

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

pub fn validate_queue(queue: &str) -> FederationResult<()> {
    if QUEUE_PATH.is_match(queue) {
        Ok(())
    } else {
        Err(FederationError::InvalidQueue(format!("{queue:?}")))
    }
}

pub fn validate_subcluster_id(id: &str) -> FederationResult<()> {
    if SUBCLUSTER_ID.is_match(id) {
        Ok(())
    } else {
        Err(FederationError::InvalidSubCluster(id.to_string()))
    }
}

fn validate_weights(kind: &str, weights: &BTreeMap<SubClusterId, f64>) -> FederationResult<()> {
    if weights.is_empty() {
        return Ok(());
    }
    for (subcluster, weight) in weights {
        if subcluster.is_empty() {
            return Err(FederationError::InvalidPolicy(format!("{kind} weight with empty subcluster id")));
        }
        if !(0.0..=1.0).contains(weight) {
            return Err(FederationError::InvalidPolicy(format!(
                "{kind} weight for {subcluster} is {weight}, outside [0, 1]"
            )));
        }
    }
    let sum: f64 = weights.values().sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(FederationError::InvalidPolicy(format!("{kind} weights sum to {sum}, not 1")));
    }
    Ok(())
}

pub fn validate_policy(policy: &QueuePolicy) -> FederationResult<()> {
    validate_weights("router", &policy.router_weights)?;
    validate_weights("amrm", &policy.amrm_weights)?;
    if !(0.0..=1.0).contains(&policy.headroom_alpha) {
        return Err(FederationError::InvalidPolicy(format!(
            "headroom_alpha {} outside [0, 1]",
            policy.headroom_alpha
        )));
    }
    if policy.policy_manager.trim().is_empty() {
        return Err(FederationError::InvalidPolicy("policy_manager is empty".to_string()));
    }
    Ok(())
}

/// Whether `queue` is `prefix` itself or one of its descendants.
pub fn queue_under(queue: &str, prefix: &str) -> bool {
    match queue.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> QueuePolicy {
        QueuePolicy {
            router_weights: BTreeMap::from([("sc1".to_string(), 0.7), ("sc2".to_string(), 0.3)]),
            amrm_weights: BTreeMap::new(),
            headroom_alpha: 0.5,
            policy_manager: "weighted-local-router".to_string(),
        }
    }

    #[test]
    fn queue_paths() {
        assert!(validate_queue("root").is_ok());
        assert!(validate_queue("root.a.b-c_d").is_ok());
        assert!(validate_queue("").is_err());
        assert!(validate_queue("root.").is_err());
        assert!(validate_queue("default").is_err());
        assert!(validate_queue("root..a").is_err());
    }

    #[test]
    fn subcluster_ids() {
        assert!(validate_subcluster_id("sc1").is_ok());
        assert!(validate_subcluster_id("SC-east.2_b").is_ok());
        assert!(validate_subcluster_id("").is_err());
        assert!(validate_subcluster_id(" ").is_err());
        assert!(validate_subcluster_id("east|2").is_err());
        assert!(validate_subcluster_id("-east").is_err());
    }

    #[test]
    fn policy_checks() {
        assert!(validate_policy(&policy()).is_ok());

        let mut p = policy();
        p.router_weights.insert("sc3".to_string(), 0.1);
        assert!(matches!(validate_policy(&p), Err(FederationError::InvalidPolicy(_))));

        let mut p = policy();
        p.headroom_alpha = 1.5;
        assert!(validate_policy(&p).is_err());

        let mut p = policy();
        p.policy_manager = " ".to_string();
        assert!(validate_policy(&p).is_err());

        let mut p = policy();
        p.amrm_weights = BTreeMap::from([("sc1".to_string(), -0.5), ("sc2".to_string(), 1.5)]);
        assert!(validate_policy(&p).is_err());
    }

    #[test]
    fn weights_within_tolerance() {
        let mut p = policy();
        p.router_weights = BTreeMap::from([
            ("a".to_string(), 0.1),
            ("b".to_string(), 0.2),
            ("c".to_string(), 0.7),
        ]);
        assert!(validate_policy(&p).is_ok());
    }

    #[test]
    fn prefix_is_segment_aware() {
        assert!(queue_under("root.a", "root.a"));
        assert!(queue_under("root.a.b", "root.a"));
        assert!(!queue_under("root.ab", "root.a"));
        assert!(!queue_under("root", "root.a"));
    }
}
