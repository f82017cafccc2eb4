//! HTTP handlers.
//!
//! Each handler turns the request into an [`AdminRequest`], runs it
//! through the gateway, and wraps the answer in the JSON envelope.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::Value;

use crate::ApiState;
use crate::error::{AdminError, ErrorKind};
use crate::gateway::{GetUserMappings, ResourceManagerAdmin};
use crate::request::AdminRequest;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        })
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::StateTransition => StatusCode::CONFLICT,
        ErrorKind::Unavailable | ErrorKind::Standby => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_response(err: &AdminError) -> impl IntoResponse {
    let kind = err.kind();
    (
        status_for(kind),
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(err.to_string()),
            kind: Some(kind),
        }),
    )
}

fn run(state: &ApiState, request: AdminRequest) -> axum::response::Response {
    match state.gateway.dispatch(request) {
        Ok(response) => ApiResponse::ok(response).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

fn parse_request(body: Value) -> Result<AdminRequest, AdminError> {
    serde_json::from_value(body).map_err(|e| AdminError::InvalidRequest(e.to_string()))
}

// ── Admin operations ───────────────────────────────────────────

/// POST /api/v1/admin
pub async fn admin(State(state): State<ApiState>, body: Bytes) -> impl IntoResponse {
    let request = serde_json::from_slice::<Value>(&body)
        .map_err(|e| AdminError::InvalidRequest(e.to_string()))
        .and_then(parse_request);
    match request {
        Ok(request) => run(&state, request),
        Err(e) => error_response(&e).into_response(),
    }
}

/// POST /api/v1/admin/{operation}
///
/// The body carries the operation's fields; it may be empty for
/// operations that take none.
pub async fn admin_operation(
    State(state): State<ApiState>,
    Path(operation): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let fields = if body.iter().all(u8::is_ascii_whitespace) {
        Ok(Value::Object(Default::default()))
    } else {
        serde_json::from_slice::<Value>(&body).map_err(|e| AdminError::InvalidRequest(e.to_string()))
    };
    let request = fields.and_then(|fields| match fields {
        Value::Object(mut map) => {
            map.insert("op".to_string(), Value::String(operation));
            parse_request(Value::Object(map))
        }
        _ => Err(AdminError::InvalidRequest("request body must be a JSON object".to_string())),
    });
    match request {
        Ok(request) => run(&state, request),
        Err(e) => error_response(&e).into_response(),
    }
}

// ── Read-only queries ──────────────────────────────────────────

/// GET /api/v1/nodes/decommissioning
pub async fn decommissioning_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.gateway.check_for_decommissioning_nodes())
}

/// GET /api/v1/labels
pub async fn list_labels(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.gateway.components().labels.vocabulary())
}

/// GET /api/v1/users/{user}/groups
pub async fn user_groups(State(state): State<ApiState>, Path(user): Path<String>) -> impl IntoResponse {
    ApiResponse::ok(state.gateway.groups_for_user(&user))
}

/// GET /api/v1/config/snapshot
pub async fn config_snapshot(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.gateway.snapshot();
    ApiResponse::ok(snapshot.as_ref().clone())
}

/// GET /api/v1/ha
pub async fn ha_state(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.gateway.ha_state())
}
