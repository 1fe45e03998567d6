//! REST API handlers.
//!
//! Each handler goes through the session router, dispatcher or capacity
//! controller and returns the JSON envelope below.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::warn;

use modelgate_backend::DispatchError;
use modelgate_core::Tier;
use modelgate_router::RouteError;
use modelgate_state::StateError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    /// Present on errors: whether the same request may succeed later.
    #[serde(skip_serializing_if = "Option::is_none")]
    retryable: Option<bool>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            retryable: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode, retryable: bool) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
            retryable: Some(retryable),
        }),
    )
        .into_response()
}

fn state_status(e: &StateError) -> StatusCode {
    match e {
        StateError::StoreUnavailable(_) | StateError::Uninitialized => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        StateError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        StateError::SessionConflict { .. } => StatusCode::CONFLICT,
        StateError::InvalidTierState(_) | StateError::Codec(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn route_status(e: &RouteError) -> StatusCode {
    match e {
        RouteError::State(inner) => state_status(inner),
        RouteError::Entropy(_) => StatusCode::SERVICE_UNAVAILABLE,
        RouteError::InvalidSessionId(_) => StatusCode::BAD_REQUEST,
    }
}

fn route_error(e: RouteError) -> axum::response::Response {
    let status = route_status(&e);
    if status.is_server_error() {
        warn!(error = %e, "routing request failed");
    }
    error_response(&e.to_string(), status, e.is_retryable())
}

fn dispatch_error(e: DispatchError) -> axum::response::Response {
    match e {
        DispatchError::Route(inner) => route_error(inner),
        e @ DispatchError::BackendUnavailable { .. } => {
            warn!(error = %e, "completion failed on every tier");
            error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE, true)
        }
    }
}

// ── Sessions ───────────────────────────────────────────────────

/// Initiate request body.
#[derive(Debug, Default, Deserialize)]
pub struct InitiateRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// POST /initiate_call
pub async fn initiate_call(
    State(state): State<ApiState>,
    body: Option<Json<InitiateRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    match state.router.initiate(req.session_id.as_deref()) {
        Ok(assignment) => ApiResponse::ok(assignment).into_response(),
        Err(e) => route_error(e),
    }
}

/// GET /sessions/{id}
pub async fn get_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.router.resolve(&id) {
        Ok(assignment) => ApiResponse::ok(assignment).into_response(),
        Err(e) => route_error(e),
    }
}

/// DELETE /sessions/{id}
pub async fn end_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.router.terminate(&id) {
        Ok(true) => ApiResponse::ok("terminated").into_response(),
        Ok(false) => error_response("session not found", StatusCode::NOT_FOUND, false),
        Err(e) => route_error(e),
    }
}

// ── Completions ────────────────────────────────────────────────

/// Chat completion request body.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub response: String,
    pub model_used: Tier,
    pub status: &'static str,
    pub fallback: bool,
}

/// POST /chat_completions
pub async fn chat_completions(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    if let Some(requests) = &state.requests {
        requests.record();
    }
    match state
        .dispatcher
        .route_request(&req.session_id, &req.message)
        .await
    {
        Ok(done) => ApiResponse::ok(ChatResponse {
            session_id: done.session_id,
            response: done.response,
            model_used: done.model_used,
            status: "completed",
            fallback: done.fallback,
        })
        .into_response(),
        Err(e) => dispatch_error(e),
    }
}

// ── Health & capacity ──────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub store_reachable: bool,
    /// Tier taking new sessions; `None` when it cannot be read.
    pub active_tier: Option<Tier>,
}

/// GET /health
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let store = state.router.store();
    let store_reachable = store.ping().is_ok();
    let active_tier = if store_reachable {
        store.tier_state().ok().map(|s| s.active_tier)
    } else {
        None
    };
    let problem = match (store_reachable, active_tier) {
        (true, Some(_)) => None,
        (false, _) => Some("state store unreachable"),
        (true, None) => Some("tier state unavailable"),
    };
    let Some(problem) = problem else {
        return (
            StatusCode::OK,
            ApiResponse::ok(Health {
                status: "ok",
                store_reachable,
                active_tier,
            }),
        )
            .into_response();
    };
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiResponse {
            success: false,
            data: Some(Health {
                status: "degraded",
                store_reachable,
                active_tier,
            }),
            error: Some(problem.to_string()),
            retryable: Some(true),
        }),
    )
        .into_response()
}

/// GET /capacity
pub async fn capacity(State(state): State<ApiState>) -> impl IntoResponse {
    let Some(controller) = &state.capacity else {
        return error_response(
            "capacity controller not running in this process",
            StatusCode::NOT_FOUND,
            false,
        );
    };
    match controller.status() {
        Ok(status) => ApiResponse::ok(status).into_response(),
        Err(e) => {
            warn!(error = %e, "capacity status unavailable");
            error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE, true)
        }
    }
}
