//! rmadmin-nodes: administration of individual compute nodes.
//!
//! # Architecture
//!
//! ```text
//! NodeRegistry (heartbeats, membership events)
//!   │
//!   ├── NodeEventPump ──▶ lifecycle cells, label/attribute state, overrides
//!   │
//!   ├── LabelStore
//!   │   ├── vocabulary (add / remove)
//!   │   ├── node → labels (replace, per node atomic)
//!   │   └── node → attributes (replace / add / remove)
//!   │
//!   ├── NodeLifecycleManager
//!   │   ├── refresh_nodes ◀── NodeListSource (include / exclude hosts)
//!   │   ├── grace timers (one per decommissioning node)
//!   │   └── report_drained
//!   │
//!   └── ResourceOverrideStore ──▶ StateStore (node_resources)
//! ```

pub mod error;
pub mod events;
pub mod hosts;
pub mod labels;
pub mod lifecycle;
pub mod registry;
pub mod resources;

pub use error::{NodeError, NodeResult};
pub use events::NodeEventPump;
pub use hosts::{FileNodeListSource, HostLists, NodeListSource, StaticNodeListSource};
pub use labels::{AttributeMappingMode, LabelStore, NodeAttribute, NodeLabel};
pub use lifecycle::{DecommissionState, DecommissionType, NodeLifecycleManager, RefreshNodesSummary, Transition};
pub use registry::{InMemoryNodeRegistry, NodeEvent, NodeRegistry};
pub use resources::ResourceOverrideStore;
