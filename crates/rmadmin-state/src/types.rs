//! Domain types for the rmadmin state store.
//!
//! These types represent the persisted state of federation queue policies,
//! subclusters, federation applications, and node resource overrides. All
//! types are serializable to/from JSON for storage in redb tables.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Unique identifier for a federation subcluster (region).
pub type SubClusterId = String;

/// Hierarchical queue path, e.g. `root.engineering.batch`.
pub type QueuePath = String;

/// Unique identifier for a federated application.
pub type ApplicationId = String;

// ── Node identity ─────────────────────────────────────────────────

/// Identity of a compute node: host plus port.
///
/// Serialized as the string `host:port` so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub host: String,
    pub port: u16,
}

/// A string that is not a valid `host:port` node identity.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid node id: {0:?}")]
pub struct InvalidNodeId(pub String);

impl NodeId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Whether this node is named by a host-list entry (port 0 matches any port).
    pub fn matches(&self, entry: &NodeId) -> bool {
        self.host == entry.host && (entry.port == 0 || entry.port == self.port)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeId {
    type Err = InvalidNodeId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| InvalidNodeId(s.to_string()))?;
                (host, port)
            }
            None => (s, 0),
        };
        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(InvalidNodeId(s.to_string()));
        }
        Ok(Self::new(host, port))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── Node resources ────────────────────────────────────────────────

/// Resource name for memory, in megabytes.
pub const MEMORY_MB: &str = "memory-mb";

/// Resource name for virtual cores.
pub const VCORES: &str = "vcores";

/// Administrative resource capacity for a node, overriding what it reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceOption {
    /// Named resource quantities (`memory-mb`, `vcores`, and any custom types).
    pub resources: BTreeMap<String, i64>,
    /// Grace period for running work that exceeds the new capacity; -1 = none.
    #[serde(default = "no_over_commit_timeout")]
    pub over_commit_timeout_ms: i64,
}

fn no_over_commit_timeout() -> i64 {
    -1
}

impl ResourceOption {
    pub fn new(memory_mb: i64, vcores: i64) -> Self {
        let mut resources = BTreeMap::new();
        resources.insert(MEMORY_MB.to_string(), memory_mb);
        resources.insert(VCORES.to_string(), vcores);
        Self {
            resources,
            over_commit_timeout_ms: no_over_commit_timeout(),
        }
    }

    /// The first resource with a negative quantity, if any.
    pub fn first_negative(&self) -> Option<(&str, i64)> {
        self.resources
            .iter()
            .find(|(_, v)| **v < 0)
            .map(|(k, v)| (k.as_str(), *v))
    }
}

/// Persisted resource override for a single node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeResourceRecord {
    pub node: NodeId,
    pub option: ResourceOption,
    /// Unix timestamp of the last update.
    pub updated_at: u64,
}

// ── Federation ────────────────────────────────────────────────────

/// Lifecycle state of a federation subcluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubClusterState {
    /// Registered and heartbeating.
    Running,
    /// No heartbeat within the liveness timeout.
    Lost,
    /// Explicitly removed by an administrator.
    Deregistered,
}

/// Registration record for a federation subcluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubClusterInfo {
    pub id: SubClusterId,
    pub state: SubClusterState,
    /// Unix timestamp of the first (or latest re-) registration.
    pub registered_at: u64,
    /// Unix timestamp of the last heartbeat.
    pub last_heartbeat: u64,
}

/// Routing and weighting policy for one queue in one subcluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuePolicy {
    /// Router weights: subcluster → share of new submissions.
    #[serde(default)]
    pub router_weights: BTreeMap<SubClusterId, f64>,
    /// AMRM weights: subcluster → share of container requests.
    #[serde(default)]
    pub amrm_weights: BTreeMap<SubClusterId, f64>,
    /// Headroom weighting factor (0.0 to 1.0).
    pub headroom_alpha: f64,
    /// Name of the policy manager that interprets the weights.
    pub policy_manager: String,
}

/// A stored queue policy, unique per `(queue, subcluster)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuePolicyRecord {
    pub queue: QueuePath,
    pub subcluster_id: SubClusterId,
    pub policy: QueuePolicy,
    /// Unix timestamp of the last save.
    pub updated_at: u64,
}

/// Federation bookkeeping for an application: where it was first submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplicationHomeSubCluster {
    pub application_id: ApplicationId,
    pub home_subcluster: SubClusterId,
    /// Unix timestamp when the record was created.
    pub created_at: u64,
}

impl QueuePolicyRecord {
    /// Key of this record in the queue policies table.
    pub fn table_key(&self) -> (&str, &str) {
        (self.subcluster_id.as_str(), self.queue.as_str())
    }
}

/// Result of a write that needs its subcluster to be registered and not
/// deregistered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardedWrite {
    Written,
    UnknownSubCluster,
    Deregistered,
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_parses_host_and_port() {
        let id: NodeId = "worker-1.example.com:8041".parse().unwrap();
        assert_eq!(id.host, "worker-1.example.com");
        assert_eq!(id.port, 8041);
        assert_eq!(id.to_string(), "worker-1.example.com:8041");
    }

    #[test]
    fn node_id_without_port_is_wildcard() {
        let entry: NodeId = "worker-1".parse().unwrap();
        assert_eq!(entry.port, 0);
        assert!(NodeId::new("worker-1", 8041).matches(&entry));
        assert!(!NodeId::new("worker-2", 8041).matches(&entry));
    }

    #[test]
    fn node_id_rejects_garbage() {
        assert!("".parse::<NodeId>().is_err());
        assert!(":8041".parse::<NodeId>().is_err());
        assert!("host:notaport".parse::<NodeId>().is_err());
    }

    #[test]
    fn node_id_keys_json_maps() {
        let mut map = BTreeMap::new();
        map.insert(NodeId::new("h1", 1), 1u32);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"h1:1":1}"#);
        let back: BTreeMap<NodeId, u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn resource_option_detects_negative_quantities() {
        let mut opt = ResourceOption::new(4096, 4);
        assert!(opt.first_negative().is_none());
        opt.resources.insert("gpu".to_string(), -1);
        assert_eq!(opt.first_negative(), Some(("gpu", -1)));
    }

    #[test]
    fn resource_option_defaults_timeout() {
        let opt: ResourceOption =
            serde_json::from_str(r#"{"resources":{"memory-mb":1024}}"#).unwrap();
        assert_eq!(opt.over_commit_timeout_ms, -1);
    }
}
