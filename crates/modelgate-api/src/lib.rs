//! modelgate-api — REST API for modelgate.
//!
//! Provides axum route handlers for starting sessions, serving chat
//! completions through the session's tier, and inspecting capacity.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/initiate_call` | Start or rejoin a session |
//! | POST | `/chat_completions` | Serve one message for a session |
//! | GET | `/sessions/{id}` | Resolve a session's assignment |
//! | DELETE | `/sessions/{id}` | End a session |
//! | GET | `/health` | Store reachability and active tier |
//! | GET | `/capacity` | Capacity controller status |
//!
//! Errors use the same envelope with `success: false`. Store outages and
//! backend failures are 503 with `retryable: true`; unknown or expired
//! sessions are 404 and need a fresh `initiate_call`.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use modelgate_autoscale::CapacityController;
use modelgate_backend::Dispatcher;
use modelgate_load::RequestRateSignal;
use modelgate_router::SessionRouter;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub router: SessionRouter,
    pub dispatcher: Dispatcher,
    /// Present when the capacity controller runs in this process.
    pub capacity: Option<CapacityController>,
    /// Fed on every chat completion when the request-rate signal is in use.
    pub requests: Option<Arc<RequestRateSignal>>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/initiate_call", post(handlers::initiate_call))
        .route("/chat_completions", post(handlers::chat_completions))
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::end_session),
        )
        .route("/health", get(handlers::health))
        .route("/capacity", get(handlers::capacity))
        .with_state(state)
}
