//! Refresh coordinator: load, validate, and atomically publish one domain.
//!
//! Every refresh follows the same three steps:
//!
//! 1. load the candidate bytes for the domain and parse them;
//! 2. validate the fragment on its own and against the current snapshot;
//! 3. build a new snapshot with only that domain replaced and publish it
//!    with a single pointer swap.
//!
//! A failure at any step leaves the current snapshot in effect.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rmadmin_state::{NodeId, ResourceOption};

use crate::acl::AccessControlList;
use crate::domain::ConfigDomain;
use crate::error::{ConfigError, ConfigResult};
use crate::groups::GroupMappingService;
use crate::queues::{self, QueueConfig};
use crate::snapshot::{ConfigurationSnapshot, ProxyUserRule, SnapshotHandle};
use crate::source::ConfigSource;

/// A parsed configuration domain that can be merged into a snapshot.
trait ConfigFragment: DeserializeOwned {
    const DOMAIN: ConfigDomain;

    fn validate(&self, current: &ConfigurationSnapshot) -> Result<(), String>;

    fn apply(self, next: &mut ConfigurationSnapshot);
}

#[derive(Deserialize)]
struct QueuesFragment {
    #[serde(default, rename = "queue")]
    queues: Vec<QueueConfig>,
}

impl ConfigFragment for QueuesFragment {
    const DOMAIN: ConfigDomain = ConfigDomain::Queues;

    fn validate(&self, current: &ConfigurationSnapshot) -> Result<(), String> {
        queues::validate_hierarchy(&self.queues)?;
        queues::validate_removals(&current.queues, &self.queues)
    }

    fn apply(self, next: &mut ConfigurationSnapshot) {
        next.queues = self.queues;
    }
}

#[derive(Deserialize)]
struct AdminAclFragment {
    acl: AccessControlList,
}

impl ConfigFragment for AdminAclFragment {
    const DOMAIN: ConfigDomain = ConfigDomain::AdminAcl;

    fn validate(&self, _current: &ConfigurationSnapshot) -> Result<(), String> {
        Ok(())
    }

    fn apply(self, next: &mut ConfigurationSnapshot) {
        next.admin_acl = self.acl;
    }
}

#[derive(Deserialize)]
struct ServiceAclsFragment {
    #[serde(default)]
    acls: BTreeMap<String, AccessControlList>,
}

impl ConfigFragment for ServiceAclsFragment {
    const DOMAIN: ConfigDomain = ConfigDomain::ServiceAcls;

    fn validate(&self, _current: &ConfigurationSnapshot) -> Result<(), String> {
        match self
            .acls
            .keys()
            .find(|k| k.is_empty() || k.chars().any(char::is_whitespace))
        {
            Some(bad) => Err(format!("malformed protocol name {bad:?}")),
            None => Ok(()),
        }
    }

    fn apply(self, next: &mut ConfigurationSnapshot) {
        next.service_acls = self.acls;
    }
}

#[derive(Deserialize)]
struct SuperUserGroupsFragment {
    #[serde(default, rename = "proxy_user")]
    rules: Vec<ProxyUserRule>,
}

impl ConfigFragment for SuperUserGroupsFragment {
    const DOMAIN: ConfigDomain = ConfigDomain::SuperUserGroups;

    fn validate(&self, _current: &ConfigurationSnapshot) -> Result<(), String> {
        let mut users = HashSet::new();
        for rule in &self.rules {
            if rule.user.trim().is_empty() {
                return Err("proxy user with empty name".to_string());
            }
            if !users.insert(rule.user.as_str()) {
                return Err(format!("proxy user {} listed twice", rule.user));
            }
            if rule.hosts.is_empty() || rule.groups.is_empty() {
                return Err(format!("proxy user {} needs at least one host and group", rule.user));
            }
        }
        Ok(())
    }

    fn apply(self, next: &mut ConfigurationSnapshot) {
        next.proxy_users = self.rules;
    }
}

#[derive(Deserialize)]
struct UserGroupsFragment {
    #[serde(default)]
    users: BTreeMap<String, Vec<String>>,
}

impl ConfigFragment for UserGroupsFragment {
    const DOMAIN: ConfigDomain = ConfigDomain::UserGroups;

    fn validate(&self, _current: &ConfigurationSnapshot) -> Result<(), String> {
        for (user, groups) in &self.users {
            if user.trim().is_empty() {
                return Err("user mapping with empty user name".to_string());
            }
            if groups.iter().any(|g| g.trim().is_empty()) {
                return Err(format!("user {user} has an empty group name"));
            }
        }
        Ok(())
    }

    fn apply(self, next: &mut ConfigurationSnapshot) {
        next.user_groups = self.users;
    }
}

#[derive(Deserialize)]
struct MaxPriorityFragment {
    max_priority: i64,
}

impl ConfigFragment for MaxPriorityFragment {
    const DOMAIN: ConfigDomain = ConfigDomain::MaxPriority;

    fn validate(&self, _current: &ConfigurationSnapshot) -> Result<(), String> {
        u32::try_from(self.max_priority)
            .map(|_| ())
            .map_err(|_| format!("max_priority {} out of range", self.max_priority))
    }

    fn apply(self, next: &mut ConfigurationSnapshot) {
        // Range checked in validate.
        next.max_priority = self.max_priority as u32;
    }
}

#[derive(Deserialize)]
struct DynamicResourcesDoc {
    #[serde(default)]
    nodes: BTreeMap<NodeId, ResourceOption>,
}

/// Result of a successful refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub domain: ConfigDomain,
    /// Version of the snapshot now in effect.
    pub version: u64,
}

/// Serializes configuration refreshes and publishes their results.
pub struct RefreshCoordinator {
    source: Arc<dyn ConfigSource>,
    snapshot: SnapshotHandle,
    groups: Arc<dyn GroupMappingService>,
    /// Held from validation to publish so refreshes never interleave.
    publish_lock: Mutex<()>,
}

impl RefreshCoordinator {
    pub fn new(
        source: Arc<dyn ConfigSource>,
        snapshot: SnapshotHandle,
        groups: Arc<dyn GroupMappingService>,
    ) -> Self {
        Self {
            source,
            snapshot,
            groups,
            publish_lock: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> &SnapshotHandle {
        &self.snapshot
    }

    pub fn refresh_queues(&self) -> ConfigResult<RefreshOutcome> {
        self.refresh_fragment::<QueuesFragment>()
    }

    pub fn refresh_admin_acls(&self) -> ConfigResult<RefreshOutcome> {
        self.refresh_fragment::<AdminAclFragment>()
    }

    pub fn refresh_service_acls(&self) -> ConfigResult<RefreshOutcome> {
        self.refresh_fragment::<ServiceAclsFragment>()
    }

    pub fn refresh_super_user_groups(&self) -> ConfigResult<RefreshOutcome> {
        self.refresh_fragment::<SuperUserGroupsFragment>()
    }

    /// Publish the new user→group table, then drop the resolver's cache.
    pub fn refresh_user_to_groups_mappings(&self) -> ConfigResult<RefreshOutcome> {
        let outcome = self.refresh_fragment::<UserGroupsFragment>()?;
        self.groups.refresh();
        Ok(outcome)
    }

    pub fn refresh_cluster_max_priority(&self) -> ConfigResult<RefreshOutcome> {
        self.refresh_fragment::<MaxPriorityFragment>()
    }

    /// Refresh any snapshot domain by name.
    pub fn refresh(&self, domain: ConfigDomain) -> ConfigResult<RefreshOutcome> {
        match domain {
            ConfigDomain::Queues => self.refresh_queues(),
            ConfigDomain::AdminAcl => self.refresh_admin_acls(),
            ConfigDomain::ServiceAcls => self.refresh_service_acls(),
            ConfigDomain::SuperUserGroups => self.refresh_super_user_groups(),
            ConfigDomain::UserGroups => self.refresh_user_to_groups_mappings(),
            ConfigDomain::MaxPriority => self.refresh_cluster_max_priority(),
            ConfigDomain::DynamicResources => {
                // Not part of the snapshot; just prove the document is valid.
                self.load_dynamic_resources()?;
                Ok(RefreshOutcome {
                    domain,
                    version: self.snapshot.current().version,
                })
            }
        }
    }

    /// Load every snapshot domain present in the source, skipping absent ones.
    pub fn load_initial(&self) -> ConfigResult<Vec<RefreshOutcome>> {
        let mut outcomes = Vec::new();
        for domain in ConfigDomain::ALL {
            if domain == ConfigDomain::DynamicResources {
                continue;
            }
            match self.refresh(domain) {
                Ok(outcome) => outcomes.push(outcome),
                Err(ConfigError::Missing(_)) => debug!(%domain, "no initial configuration, using defaults"),
                Err(e) => return Err(e),
            }
        }
        Ok(outcomes)
    }

    /// Parse and validate the per-node resource overrides document.
    pub fn load_dynamic_resources(&self) -> ConfigResult<BTreeMap<NodeId, ResourceOption>> {
        let domain = ConfigDomain::DynamicResources;
        let doc: DynamicResourcesDoc = self.load(domain)?;
        for (node, option) in &doc.nodes {
            if let Some((name, value)) = option.first_negative() {
                return Err(ConfigError::Invalid {
                    domain,
                    reason: format!("node {node}: resource {name} = {value} is negative"),
                });
            }
        }
        Ok(doc.nodes)
    }

    fn load<T: DeserializeOwned>(&self, domain: ConfigDomain) -> ConfigResult<T> {
        let bytes = self.source.load_candidate(domain)?;
        let text = std::str::from_utf8(&bytes).map_err(|e| ConfigError::Parse {
            domain,
            reason: e.to_string(),
        })?;
        toml::from_str(text).map_err(|e| {
            warn!(%domain, error = %e, "configuration candidate failed to parse");
            ConfigError::Parse {
                domain,
                reason: e.to_string(),
            }
        })
    }

    fn refresh_fragment<F: ConfigFragment>(&self) -> ConfigResult<RefreshOutcome> {
        let domain = F::DOMAIN;
        let candidate: F = self.load(domain)?;

        let _guard = self.publish_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.snapshot.current();
        if let Err(reason) = candidate.validate(&current) {
            warn!(%domain, %reason, version = current.version, "configuration refresh rejected");
            return Err(ConfigError::Invalid { domain, reason });
        }

        let mut next = (*current).clone();
        candidate.apply(&mut next);
        next.version = current.version + 1;
        let published = self.snapshot.publish(next);

        info!(%domain, version = published.version, "configuration published");
        Ok(RefreshOutcome {
            domain,
            version: published.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::CachedGroupMapping;
    use crate::source::MemoryConfigSource;

    const QUEUES_V1: &str = r#"
[[queue]]
path = "root"
capacity = 100

[[queue]]
path = "root.a"
capacity = 60

[[queue]]
path = "root.b"
capacity = 40
submit_acl = "alice dev"
"#;

    const QUEUES_BAD_SUM: &str = r#"
[[queue]]
path = "root"
capacity = 100

[[queue]]
path = "root.a"
capacity = 70

[[queue]]
path = "root.b"
capacity = 40
"#;

    struct Fixture {
        source: Arc<MemoryConfigSource>,
        groups: Arc<CachedGroupMapping>,
        coordinator: RefreshCoordinator,
    }

    fn fixture() -> Fixture {
        let source = Arc::new(MemoryConfigSource::new());
        let handle = SnapshotHandle::default();
        let groups = Arc::new(CachedGroupMapping::new(handle.clone()));
        let coordinator = RefreshCoordinator::new(source.clone(), handle, groups.clone());
        Fixture {
            source,
            groups,
            coordinator,
        }
    }

    #[test]
    fn refresh_queues_publishes_new_version() {
        let f = fixture();
        f.source.set(ConfigDomain::Queues, QUEUES_V1);

        let outcome = f.coordinator.refresh_queues().unwrap();
        assert_eq!(outcome.version, 1);

        let snap = f.coordinator.snapshot().current();
        assert_eq!(snap.queues.len(), 3);
        assert!(snap.queue("root.b").unwrap().submit_acl.as_ref().unwrap().users.contains("alice"));
    }

    #[test]
    fn invalid_refresh_keeps_previous_snapshot() {
        let f = fixture();
        f.source.set(ConfigDomain::Queues, QUEUES_V1);
        f.coordinator.refresh_queues().unwrap();
        let before = f.coordinator.snapshot().current();

        f.source.set(ConfigDomain::Queues, QUEUES_BAD_SUM);
        let err = f.coordinator.refresh_queues().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { domain: ConfigDomain::Queues, .. }));

        let after = f.coordinator.snapshot().current();
        assert_eq!(*after, *before);
    }

    #[test]
    fn unparsable_refresh_keeps_previous_snapshot() {
        let f = fixture();
        f.source.set(ConfigDomain::MaxPriority, "max_priority = 10");
        f.coordinator.refresh_cluster_max_priority().unwrap();

        f.source.set(ConfigDomain::MaxPriority, "max_priority = \"ten\"");
        assert!(matches!(
            f.coordinator.refresh_cluster_max_priority(),
            Err(ConfigError::Parse { .. })
        ));
        assert_eq!(f.coordinator.snapshot().current().max_priority, 10);
    }

    #[test]
    fn negative_max_priority_rejected() {
        let f = fixture();
        f.source.set(ConfigDomain::MaxPriority, "max_priority = -1");
        assert!(matches!(
            f.coordinator.refresh_cluster_max_priority(),
            Err(ConfigError::Invalid { .. })
        ));
        assert_eq!(f.coordinator.snapshot().current().version, 0);
    }

    #[test]
    fn removing_running_queue_is_referentially_invalid() {
        let f = fixture();
        f.source.set(ConfigDomain::Queues, QUEUES_V1);
        f.coordinator.refresh_queues().unwrap();

        f.source.set(
            ConfigDomain::Queues,
            "[[queue]]\npath = \"root\"\ncapacity = 100\n\n[[queue]]\npath = \"root.a\"\ncapacity = 100\n",
        );
        let err = f.coordinator.refresh_queues().unwrap_err();
        assert!(err.to_string().contains("root.b"));
    }

    #[test]
    fn refresh_replaces_only_its_domain() {
        let f = fixture();
        f.source.set(ConfigDomain::Queues, QUEUES_V1);
        f.source.set(ConfigDomain::AdminAcl, "acl = \"root admins\"");
        f.coordinator.refresh_queues().unwrap();
        f.coordinator.refresh_admin_acls().unwrap();

        let snap = f.coordinator.snapshot().current();
        assert_eq!(snap.version, 2);
        assert_eq!(snap.queues.len(), 3);
        assert!(snap.admin_acl.groups.contains("admins"));
    }

    #[test]
    fn user_group_refresh_clears_resolver_cache() {
        let f = fixture();
        f.source.set(ConfigDomain::UserGroups, "[users]\nalice = [\"dev\"]\n");
        f.coordinator.refresh_user_to_groups_mappings().unwrap();
        assert_eq!(f.groups.groups_for_user("alice"), vec!["dev"]);

        f.source.set(ConfigDomain::UserGroups, "[users]\nalice = [\"ops\", \"dev\"]\n");
        f.coordinator.refresh_user_to_groups_mappings().unwrap();
        assert_eq!(f.groups.groups_for_user("alice"), vec!["ops", "dev"]);
    }

    #[test]
    fn super_user_groups_validation() {
        let f = fixture();
        f.source.set(
            ConfigDomain::SuperUserGroups,
            "[[proxy_user]]\nuser = \"oozie\"\nhosts = [\"*\"]\ngroups = []\n",
        );
        assert!(f.coordinator.refresh_super_user_groups().is_err());

        f.source.set(
            ConfigDomain::SuperUserGroups,
            "[[proxy_user]]\nuser = \"oozie\"\nhosts = [\"gw1\"]\ngroups = [\"staff\"]\n",
        );
        f.coordinator.refresh_super_user_groups().unwrap();
        assert_eq!(f.coordinator.snapshot().current().proxy_users[0].user, "oozie");
    }

    #[test]
    fn service_acls_refresh() {
        let f = fixture();
        f.source.set(
            ConfigDomain::ServiceAcls,
            "[acls]\n\"security.admin.protocol.acl\" = \"yarn admins\"\n",
        );
        f.coordinator.refresh_service_acls().unwrap();
        let snap = f.coordinator.snapshot().current();
        assert!(snap.service_acls["security.admin.protocol.acl"].users.contains("yarn"));
    }

    #[test]
    fn missing_domain_reported() {
        let f = fixture();
        assert!(matches!(
            f.coordinator.refresh_service_acls(),
            Err(ConfigError::Missing(ConfigDomain::ServiceAcls))
        ));
    }

    #[test]
    fn load_initial_skips_missing_domains() {
        let f = fixture();
        f.source.set(ConfigDomain::Queues, QUEUES_V1);
        f.source.set(ConfigDomain::MaxPriority, "max_priority = 3");

        let outcomes = f.coordinator.load_initial().unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(f.coordinator.snapshot().current().version, 2);
    }

    #[test]
    fn dynamic_resources_parse_and_validate() {
        let f = fixture();
        f.source.set(
            ConfigDomain::DynamicResources,
            "[nodes.\"worker-1:8041\".resources]\nmemory-mb = 8192\nvcores = 8\n",
        );
        let map = f.coordinator.load_dynamic_resources().unwrap();
        let opt = &map[&NodeId::new("worker-1", 8041)];
        assert_eq!(opt.resources["vcores"], 8);

        f.source.set(
            ConfigDomain::DynamicResources,
            "[nodes.\"worker-1:8041\".resources]\nmemory-mb = -5\n",
        );
        assert!(matches!(
            f.coordinator.load_dynamic_resources(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn concurrent_readers_never_see_invalid_content() {
        let f = fixture();
        f.source.set(ConfigDomain::Queues, QUEUES_V1);
        f.coordinator.refresh_queues().unwrap();
        let coordinator = Arc::new(f.coordinator);

        let reader = {
            let handle = coordinator.snapshot().clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    let snap = handle.current();
                    assert!(queues::validate_hierarchy(&snap.queues).is_ok());
                    assert_eq!(snap.queues.len(), 3);
                }
            })
        };

        for i in 0..50 {
            let doc = if i % 2 == 0 { QUEUES_BAD_SUM } else { QUEUES_V1 };
            f.source.set(ConfigDomain::Queues, doc);
            let _ = coordinator.refresh_queues();
        }
        reader.join().unwrap();
    }
}
