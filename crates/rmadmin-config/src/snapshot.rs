//! The versioned configuration bundle and the handle that publishes it.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::acl::AccessControlList;
use crate::queues::QueueConfig;

/// Hosts and groups a super-user may impersonate from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyUserRule {
    pub user: String,
    /// Hosts the proxy user may connect from (`*` = any).
    pub hosts: Vec<String>,
    /// Groups whose members may be impersonated (`*` = any).
    pub groups: Vec<String>,
}

/// Immutable bundle of every refreshable configuration domain.
///
/// A new snapshot is built for every successful refresh; existing ones
/// are never mutated after publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationSnapshot {
    /// Incremented by one on every publish; 0 is the startup default.
    pub version: u64,
    pub queues: Vec<QueueConfig>,
    pub admin_acl: AccessControlList,
    /// Protocol name → ACL.
    pub service_acls: BTreeMap<String, AccessControlList>,
    pub proxy_users: Vec<ProxyUserRule>,
    /// User → ordered group list.
    pub user_groups: BTreeMap<String, Vec<String>>,
    pub max_priority: u32,
}

impl Default for ConfigurationSnapshot {
    fn default() -> Self {
        Self {
            version: 0,
            queues: vec![QueueConfig::root()],
            admin_acl: AccessControlList::everyone(),
            service_acls: BTreeMap::new(),
            proxy_users: Vec::new(),
            user_groups: BTreeMap::new(),
            max_priority: 0,
        }
    }
}

impl ConfigurationSnapshot {
    pub fn queue(&self, path: &str) -> Option<&QueueConfig> {
        self.queues.iter().find(|q| q.path == path)
    }
}

/// Owned, cloneable handle to the single active snapshot.
///
/// Publishing is one pointer swap: a reader either gets the previous
/// `Arc` or the new one, never a mix.
#[derive(Clone)]
pub struct SnapshotHandle {
    inner: Arc<ArcSwap<ConfigurationSnapshot>>,
}

impl SnapshotHandle {
    pub fn new(initial: ConfigurationSnapshot) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// The snapshot in effect right now. Hold on to it for a consistent view.
    pub fn current(&self) -> Arc<ConfigurationSnapshot> {
        self.inner.load_full()
    }

    /// Replace the active snapshot.
    pub fn publish(&self, snapshot: ConfigurationSnapshot) -> Arc<ConfigurationSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.inner.store(Arc::clone(&snapshot));
        snapshot
    }
}

impl Default for SnapshotHandle {
    fn default() -> Self {
        Self::new(ConfigurationSnapshot::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_snapshot_survives_publish() {
        let handle = SnapshotHandle::default();
        let before = handle.current();

        let mut next = (*before).clone();
        next.version = 1;
        next.max_priority = 10;
        handle.publish(next);

        assert_eq!(before.version, 0);
        assert_eq!(before.max_priority, 0);
        assert_eq!(handle.current().max_priority, 10);
    }

    #[test]
    fn clones_share_the_pointer() {
        let a = SnapshotHandle::default();
        let b = a.clone();
        let mut next = (*a.current()).clone();
        next.version = 7;
        a.publish(next);
        assert_eq!(b.current().version, 7);
    }

    #[test]
    fn default_has_root_queue() {
        let snap = ConfigurationSnapshot::default();
        assert_eq!(snap.queue("root").unwrap().capacity, 100.0);
        assert!(snap.admin_acl.all);
    }
}
