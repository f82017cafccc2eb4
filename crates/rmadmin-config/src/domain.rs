//! The fixed set of refreshable configuration domains.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A configuration domain that can be reloaded at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigDomain {
    Queues,
    AdminAcl,
    ServiceAcls,
    SuperUserGroups,
    UserGroups,
    MaxPriority,
    DynamicResources,
}

impl ConfigDomain {
    pub const ALL: [ConfigDomain; 7] = [
        ConfigDomain::Queues,
        ConfigDomain::AdminAcl,
        ConfigDomain::ServiceAcls,
        ConfigDomain::SuperUserGroups,
        ConfigDomain::UserGroups,
        ConfigDomain::MaxPriority,
        ConfigDomain::DynamicResources,
    ];

    /// File stem used by [`crate::FileConfigSource`] (`<stem>.toml`).
    pub fn file_stem(self) -> &'static str {
        match self {
            ConfigDomain::Queues => "queues",
            ConfigDomain::AdminAcl => "admin-acl",
            ConfigDomain::ServiceAcls => "service-acls",
            ConfigDomain::SuperUserGroups => "superuser-groups",
            ConfigDomain::UserGroups => "user-groups",
            ConfigDomain::MaxPriority => "max-priority",
            ConfigDomain::DynamicResources => "dynamic-resources",
        }
    }
}

impl fmt::Display for ConfigDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}
