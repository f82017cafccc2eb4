//! rmadmin-federation: cross-subcluster queue policies and bookkeeping.
//!
//! # Architecture
//!
//! ```text
//! SubClusterRegistry
//!   ├── register / heartbeat
//!   └── mark_lost (periodic sweep)       Running ──▶ Lost ──▶ Deregistered
//!
//! FederationPolicyStore
//!   ├── save / batch_save (validate, then upsert per item)
//!   ├── query (queue prefix, subcluster, paging)
//!   └── delete_for_subcluster ──▶ one redb transaction:
//!                                  drop policies + mark Deregistered
//!
//! ApplicationStore
//!   └── application id → home subcluster
//! ```

pub mod applications;
pub mod error;
pub mod policies;
pub mod subclusters;
pub mod validate;

pub use applications::ApplicationStore;
pub use error::{FederationError, FederationResult};
pub use policies::{DeregisterOutcome, FederationPolicyStore, PolicyFilter, PolicyPage, PolicySave};
pub use subclusters::SubClusterRegistry;
