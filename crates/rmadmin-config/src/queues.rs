//! Scheduler queue hierarchy definitions and their validation.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::acl::AccessControlList;

/// Queue paths: `root` followed by dot-separated segments.
static QUEUE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^root(\.[A-Za-z0-9_\-]+)*$").expect("static regex"));

const CAPACITY_EPSILON: f64 = 1e-3;

/// Whether `path` is a well-formed hierarchical queue path.
pub fn is_valid_queue_path(path: &str) -> bool {
    QUEUE_PATH.is_match(path)
}

/// Parent path of a queue (`None` for `root`).
pub fn parent_of(path: &str) -> Option<&str> {
    path.rsplit_once('.').map(|(parent, _)| parent)
}

/// Administrative state of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    #[default]
    Running,
    Stopped,
}

/// One queue in the scheduler hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub path: String,
    /// Guaranteed share of the parent, in percent.
    pub capacity: f64,
    /// Elastic ceiling, in percent of the parent.
    pub max_capacity: Option<f64>,
    #[serde(default)]
    pub state: QueueState,
    pub submit_acl: Option<AccessControlList>,
    pub administer_acl: Option<AccessControlList>,
}

impl QueueConfig {
    pub fn root() -> Self {
        Self {
            path: "root".to_string(),
            capacity: 100.0,
            max_capacity: None,
            state: QueueState::Running,
            submit_acl: None,
            administer_acl: None,
        }
    }
}

/// Check a full queue hierarchy in isolation.
pub fn validate_hierarchy(queues: &[QueueConfig]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for q in queues {
        if !is_valid_queue_path(&q.path) {
            return Err(format!("malformed queue path {:?}", q.path));
        }
        if !seen.insert(q.path.as_str()) {
            return Err(format!("queue {} defined twice", q.path));
        }
        if !(0.0..=100.0).contains(&q.capacity) {
            return Err(format!("queue {} capacity {} outside 0..=100", q.path, q.capacity));
        }
        if let Some(max) = q.max_capacity {
            if max < q.capacity || max > 100.0 {
                return Err(format!(
                    "queue {} max_capacity {max} must be within capacity..=100",
                    q.path
                ));
            }
        }
    }
    if !seen.contains("root") {
        return Err("queue hierarchy has no root".to_string());
    }

    let mut child_sums: BTreeMap<&str, f64> = BTreeMap::new();
    for q in queues {
        if let Some(parent) = parent_of(&q.path) {
            if !seen.contains(parent) {
                return Err(format!("queue {} has undefined parent {parent}", q.path));
            }
            *child_sums.entry(parent).or_default() += q.capacity;
        }
    }
    for (parent, sum) in child_sums {
        if (sum - 100.0).abs() > CAPACITY_EPSILON {
            return Err(format!("children of {parent} sum to {sum}, expected 100"));
        }
    }
    Ok(())
}

/// Check a candidate hierarchy against the one currently in effect.
///
/// A queue may only disappear from the hierarchy once it has been stopped.
pub fn validate_removals(current: &[QueueConfig], candidate: &[QueueConfig]) -> Result<(), String> {
    let kept: HashSet<&str> = candidate.iter().map(|q| q.path.as_str()).collect();
    for q in current {
        if !kept.contains(q.path.as_str()) && q.state != QueueState::Stopped {
            return Err(format!("queue {} removed while still running; stop it first", q.path));
        }
    }
    Ok(())
}
