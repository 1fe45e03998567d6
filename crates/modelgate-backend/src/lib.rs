//! modelgate-backend — tier backends and request dispatch.
//!
//! A [`Dispatcher`] resolves a session's tier through the router, calls
//! that tier's [`InferenceBackend`], and on failure records a fallback and
//! retries once on the other tier.

pub mod backend;
pub mod dispatch;

pub use backend::{BackendError, InferenceBackend, SimulatedBackend};
pub use dispatch::{Completion, DispatchError, Dispatcher};
