//! Error types for session routing.

use modelgate_state::StateError;
use thiserror::Error;

pub type RouteResult<T> = Result<T, RouteError>;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    State(#[from] StateError),

    /// The OS random source failed while drawing a selector.
    #[error("selector draw failed: {0}")]
    Entropy(String),

    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
}

impl RouteError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RouteError::State(e) => e.is_retryable(),
            RouteError::Entropy(_) => true,
            RouteError::InvalidSessionId(_) => false,
        }
    }
}
