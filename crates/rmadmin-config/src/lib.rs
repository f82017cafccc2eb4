//! rmadmin-config: refreshable cluster configuration.
//!
//! Holds the single active [`ConfigurationSnapshot`] behind a
//! [`SnapshotHandle`] and swaps it atomically when an administrator asks
//! for one of the configuration domains to be reloaded.
//!
//! # Architecture
//!
//! ```text
//! RefreshCoordinator
//!   ├── ConfigSource (load raw TOML bytes per domain)
//!   ├── parse + validate fragment against the current snapshot
//!   ├── SnapshotHandle (ArcSwap pointer, one swap per publish)
//!   └── GroupMappingService (cache cleared after user→group refresh)
//! ```
//!
//! Readers call [`SnapshotHandle::current`] and keep the returned `Arc`
//! for as long as they need a consistent view.

pub mod acl;
pub mod domain;
pub mod error;
pub mod groups;
pub mod queues;
pub mod refresh;
pub mod snapshot;
pub mod source;

pub use acl::AccessControlList;
pub use domain::ConfigDomain;
pub use error::{ConfigError, ConfigResult};
pub use groups::{CachedGroupMapping, GroupMappingService};
pub use queues::{QueueConfig, QueueState};
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use snapshot::{ConfigurationSnapshot, ProxyUserRule, SnapshotHandle};
pub use source::{ConfigSource, FileConfigSource, MemoryConfigSource};
