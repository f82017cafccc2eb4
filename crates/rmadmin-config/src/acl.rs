//! Access control lists in the `"users groups"` notation.
//!
//! `*` admits everyone, a blank string admits nobody, otherwise the first
//! whitespace-separated token lists users and the optional second token
//! lists groups, both comma-separated: `"alice,bob admins,ops"`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessControlList {
    pub all: bool,
    pub users: BTreeSet<String>,
    pub groups: BTreeSet<String>,
}

impl AccessControlList {
    pub fn everyone() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }

    /// Whether `user`, a member of `groups`, is admitted.
    pub fn is_allowed(&self, user: &str, groups: &[String]) -> bool {
        self.all || self.users.contains(user) || groups.iter().any(|g| self.groups.contains(g))
    }
}

fn split_names(token: &str) -> BTreeSet<String> {
    token
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl FromStr for AccessControlList {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end();
        if s.trim_start() == "*" {
            return Ok(Self::everyone());
        }
        // A leading space means "no users, only groups".
        let (users, groups) = match s.split_once(char::is_whitespace) {
            Some((users, groups)) => (users, groups.trim()),
            None => (s, ""),
        };
        if groups.split_whitespace().count() > 1 {
            return Err(format!("ACL {s:?} has more than two fields"));
        }
        let users = split_names(users);
        let groups = split_names(groups);
        if users.contains("*") || groups.contains("*") {
            return Err(format!("ACL {s:?} mixes '*' with names"));
        }
        Ok(Self {
            all: false,
            users,
            groups,
        })
    }
}

impl fmt::Display for AccessControlList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.all {
            return f.write_str("*");
        }
        let users: Vec<&str> = self.users.iter().map(String::as_str).collect();
        let groups: Vec<&str> = self.groups.iter().map(String::as_str).collect();
        write!(f, "{}", users.join(","))?;
        if !groups.is_empty() {
            write!(f, " {}", groups.join(","))?;
        }
        Ok(())
    }
}

impl Serialize for AccessControlList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AccessControlList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_admits_everyone() {
        let acl: AccessControlList = "*".parse().unwrap();
        assert!(acl.is_allowed("anyone", &[]));
        assert_eq!(acl.to_string(), "*");
    }

    #[test]
    fn blank_admits_nobody() {
        let acl: AccessControlList = "  ".parse().unwrap();
        assert!(!acl.is_allowed("alice", &["admins".to_string()]));
    }

    #[test]
    fn users_and_groups() {
        let acl: AccessControlList = "alice,bob admins".parse().unwrap();
        assert!(acl.is_allowed("bob", &[]));
        assert!(acl.is_allowed("carol", &["admins".to_string()]));
        assert!(!acl.is_allowed("carol", &["dev".to_string()]));
        assert_eq!(acl.to_string(), "alice,bob admins");
    }

    #[test]
    fn groups_only() {
        let acl: AccessControlList = " ops".parse().unwrap();
        assert!(acl.users.is_empty());
        assert!(acl.is_allowed("dave", &["ops".to_string()]));
        assert_eq!(acl.to_string(), " ops");
    }

    #[test]
    fn too_many_fields_rejected() {
        assert!("a b c".parse::<AccessControlList>().is_err());
        assert!("alice,* admins".parse::<AccessControlList>().is_err());
    }
}
