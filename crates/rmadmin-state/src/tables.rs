//! redb table definitions for the rmadmin state store.
//!
//! Values are JSON-serialized domain types. Queue policies use a
//! `(subcluster, queue)` tuple key so one subcluster's records form a
//! contiguous range; the other tables use `&str` keys.

use redb::TableDefinition;

/// Federation queue policies keyed by `(subcluster_id, queue)`.
pub const QUEUE_POLICIES: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("queue_policies");

/// Subcluster registrations keyed by `{subcluster_id}`.
pub const SUBCLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("subclusters");

/// Federation application home records keyed by `{application_id}`.
pub const APPLICATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("applications");

/// Node resource overrides keyed by `{host}:{port}`.
pub const NODE_RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("node_resources");
