//! Error types for the modelgate state store.

use modelgate_core::Tier;
use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// The backing store could not be reached. Retryable.
    #[error("state store unavailable: {0}")]
    StoreUnavailable(String),

    /// No live session with this id (never created, expired, or ended).
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// An active session was asked to take a different assignment.
    #[error(
        "session {session_id} already assigned to {existing} (selector {existing_selector}), refusing {requested} (selector {requested_selector})"
    )]
    SessionConflict {
        session_id: String,
        existing: Tier,
        existing_selector: u8,
        requested: Tier,
        requested_selector: u8,
    },

    /// The tier state record has not been bootstrapped yet.
    #[error("tier state not initialised")]
    Uninitialized,

    /// A tier state write would break its invariants.
    #[error("invalid tier state: {0}")]
    InvalidTierState(String),

    /// A stored record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl StateError {
    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StateError::StoreUnavailable(_))
    }
}
