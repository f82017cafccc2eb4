//! rmadmin-api: the admin gateway and its JSON-over-HTTP surface.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/admin` | Any operation, tagged by `op` in the body |
//! | POST | `/api/v1/admin/{operation}` | One operation; body holds its fields |
//! | GET | `/api/v1/nodes/decommissioning` | Nodes currently decommissioning |
//! | GET | `/api/v1/labels` | Cluster label vocabulary |
//! | GET | `/api/v1/users/{user}/groups` | Groups of a user |
//! | GET | `/api/v1/config/snapshot` | Active configuration snapshot |
//! | GET | `/api/v1/ha` | HA role of this instance |
//!
//! Responses use the envelope `{success, data?, error?, kind?}`; error
//! kinds map to 400 (validation), 404 (not found), 409 (conflict) and
//! 503 (unavailable, standby).

pub mod error;
pub mod gateway;
pub mod handlers;
pub mod request;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

pub use error::{AdminError, AdminResult, ErrorKind};
pub use gateway::{AdminComponents, AdminGateway, GetUserMappings, HaState, ResourceManagerAdmin};
pub use request::{AdminRequest, AdminResponse, ItemResult};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<AdminGateway>,
}

/// Build the complete admin router.
pub fn build_router(gateway: Arc<AdminGateway>) -> Router {
    let api_state = ApiState { gateway };

    let api_routes = Router::new()
        .route("/admin", post(handlers::admin))
        .route("/admin/{operation}", post(handlers::admin_operation))
        .route("/nodes/decommissioning", get(handlers::decommissioning_nodes))
        .route("/labels", get(handlers::list_labels))
        .route("/users/{user}/groups", get(handlers::user_groups))
        .route("/config/snapshot", get(handlers::config_snapshot))
        .route("/ha", get(handlers::ha_state))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
