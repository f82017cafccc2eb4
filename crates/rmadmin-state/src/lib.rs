//! rmadmin-state: durable records of the admin control plane.
//!
//! Four redb tables hold what must survive a restart: federation queue
//! policies, subcluster registrations, application home records, and
//! per-node resource overrides. Configuration snapshots and node
//! lifecycle state are rebuilt at startup and never stored here.
//!
//! # Layout
//!
//! Values are JSON documents. Queue policies are keyed by the tuple
//! `(subcluster, queue)`, so a subcluster's records are one key range and
//! no id can shadow another. Deregistration drops that range inside the
//! same write transaction that flips the subcluster's state, and policy
//! or application writes that need a live subcluster check it inside
//! their own write transaction. [`StateStore`] clones share one
//! `Arc<Database>`; redb runs write transactions one at a time.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
