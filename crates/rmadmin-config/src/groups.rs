//! User → group resolution.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::debug;

use crate::snapshot::SnapshotHandle;

/// Resolves the groups a user belongs to.
pub trait GroupMappingService: Send + Sync {
    /// Ordered group names for `user`; empty if the user is unknown.
    fn groups_for_user(&self, user: &str) -> Vec<String>;

    /// Drop anything cached and reload from the backing source.
    fn refresh(&self);
}

/// Group mapping backed by the published user→group table, with a per-user cache.
///
/// Cached answers stay in effect until [`GroupMappingService::refresh`].
/// Entries carry the cache generation they were resolved under; an entry
/// from an earlier generation is a miss, so a lookup that raced a refresh
/// cannot pin the old mapping.
pub struct CachedGroupMapping {
    snapshot: SnapshotHandle,
    generation: AtomicU64,
    cache: DashMap<String, (u64, Vec<String>)>,
}

impl CachedGroupMapping {
    pub fn new(snapshot: SnapshotHandle) -> Self {
        Self {
            snapshot,
            generation: AtomicU64::new(0),
            cache: DashMap::new(),
        }
    }

    fn resolve(&self, user: &str, generation: u64) -> Vec<String> {
        let groups = self
            .snapshot
            .current()
            .user_groups
            .get(user)
            .cloned()
            .unwrap_or_default();
        self.cache.insert(user.to_string(), (generation, groups.clone()));
        groups
    }

    pub fn cached_users(&self) -> usize {
        self.cache.len()
    }
}

impl GroupMappingService for CachedGroupMapping {
    fn groups_for_user(&self, user: &str) -> Vec<String> {
        // Read the generation before the snapshot.
        let generation = self.generation.load(Ordering::Acquire);
        if let Some(entry) = self.cache.get(user) {
            let (cached_at, groups) = entry.value();
            if *cached_at == generation {
                return groups.clone();
            }
        }
        self.resolve(user, generation)
    }

    fn refresh(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let dropped = self.cache.len();
        self.cache.clear();
        debug!(dropped, "group mapping cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ConfigurationSnapshot;

    fn snapshot_with(user: &str, groups: &[&str]) -> ConfigurationSnapshot {
        let mut snap = ConfigurationSnapshot::default();
        snap.user_groups.insert(
            user.to_string(),
            groups.iter().map(|g| g.to_string()).collect(),
        );
        snap
    }

    #[test]
    fn resolves_in_order() {
        let handle = SnapshotHandle::new(snapshot_with("alice", &["dev", "admins"]));
        let mapping = CachedGroupMapping::new(handle);
        assert_eq!(mapping.groups_for_user("alice"), vec!["dev", "admins"]);
        assert!(mapping.groups_for_user("nobody").is_empty());
    }

    #[test]
    fn cache_holds_until_refresh() {
        let handle = SnapshotHandle::new(snapshot_with("alice", &["dev"]));
        let mapping = CachedGroupMapping::new(handle.clone());
        assert_eq!(mapping.groups_for_user("alice"), vec!["dev"]);

        handle.publish(snapshot_with("alice", &["ops"]));
        assert_eq!(mapping.groups_for_user("alice"), vec!["dev"]);

        mapping.refresh();
        assert_eq!(mapping.cached_users(), 0);
        assert_eq!(mapping.groups_for_user("alice"), vec!["ops"]);
    }

    #[test]
    fn lookup_racing_a_refresh_does_not_pin_old_groups() {
        let handle = SnapshotHandle::new(snapshot_with("alice", &["dev"]));
        let mapping = CachedGroupMapping::new(handle.clone());

        // A reader resolved under the old generation, then the new mapping
        // was published and the cache cleared before its insert landed.
        let stale_generation = mapping.generation.load(Ordering::Acquire);
        handle.publish(snapshot_with("alice", &["ops"]));
        mapping.refresh();
        mapping
            .cache
            .insert("alice".to_string(), (stale_generation, vec!["dev".to_string()]));

        assert_eq!(mapping.groups_for_user("alice"), vec!["ops"]);
        assert_eq!(mapping.groups_for_user("alice"), vec!["ops"]);
    }

    #[test]
    fn concurrent_lookups_see_published_mapping_after_refresh() {
        let handle = SnapshotHandle::new(snapshot_with("alice", &["dev"]));
        let mapping = CachedGroupMapping::new(handle.clone());

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..500 {
                        mapping.groups_for_user("alice");
                    }
                });
            }
            s.spawn(|| {
                handle.publish(snapshot_with("alice", &["ops"]));
                mapping.refresh();
            });
        });

        assert_eq!(mapping.groups_for_user("alice"), vec!["ops"]);
    }
}
