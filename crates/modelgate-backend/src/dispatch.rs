//! Per-session request dispatch with a single fallback retry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use modelgate_core::Tier;
use modelgate_router::{RouteError, SessionRouter};

use crate::backend::InferenceBackend;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("no backend could serve session {session_id}: {reason}")]
    BackendUnavailable { session_id: String, reason: String },
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Route(e) => e.is_retryable(),
            DispatchError::BackendUnavailable { .. } => true,
        }
    }
}

impl From<modelgate_state::StateError> for DispatchError {
    fn from(e: modelgate_state::StateError) -> Self {
        DispatchError::Route(e.into())
    }
}

/// A served completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub session_id: String,
    pub response: String,
    pub model_used: Tier,
    /// Served by the fallback tier rather than the assigned one.
    pub fallback: bool,
}

/// Sends each call to the backend of its session's tier.
#[derive(Clone)]
pub struct Dispatcher {
    router: SessionRouter,
    small: Arc<dyn InferenceBackend>,
    large: Arc<dyn InferenceBackend>,
}

impl Dispatcher {
    pub fn new(
        router: SessionRouter,
        small: Arc<dyn InferenceBackend>,
        large: Arc<dyn InferenceBackend>,
    ) -> Self {
        Self {
            router,
            small,
            large,
        }
    }

    pub fn router(&self) -> &SessionRouter {
        &self.router
    }

    fn backend(&self, tier: Tier) -> &Arc<dyn InferenceBackend> {
        match tier {
            Tier::Small => &self.small,
            Tier::Large => &self.large,
        }
    }

    /// Serve `message` for `session_id`.
    ///
    /// On a backend failure the session is pinned to the other tier and
    /// the call is retried there once. Falling back onto small requires
    /// the small tier to be up.
    pub async fn route_request(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<Completion, DispatchError> {
        let assignment = self.router.resolve(session_id)?;
        let first = match self.backend(assignment.tier).complete(session_id, message).await {
            Ok(response) => {
                return Ok(Completion {
                    session_id: session_id.to_string(),
                    response,
                    model_used: assignment.tier,
                    fallback: false,
                });
            }
            Err(e) => e,
        };
        warn!(%session_id, tier = %assignment.tier, error = %first, "backend call failed");

        let alternate = assignment.tier.other();
        if alternate == Tier::Small && !self.router.store().tier_state()?.small_tier_active {
            return Err(DispatchError::BackendUnavailable {
                session_id: session_id.to_string(),
                reason: format!("{first}; small tier not active for fallback"),
            });
        }

        self.router.record_fallback(session_id, alternate)?;
        match self.backend(alternate).complete(session_id, message).await {
            Ok(response) => {
                info!(%session_id, tier = %alternate, "served by fallback tier");
                Ok(Completion {
                    session_id: session_id.to_string(),
                    response,
                    model_used: alternate,
                    fallback: true,
                })
            }
            Err(second) => Err(DispatchError::BackendUnavailable {
                session_id: session_id.to_string(),
                reason: format!("{first}; {second}"),
            }),
        }
    }
}
