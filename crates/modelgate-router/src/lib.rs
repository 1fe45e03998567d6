//! modelgate-router — session placement.
//!
//! A session draws a selector once, at `initiate`, and is mapped to a tier
//! from the tier currently taking new sessions. The triple is persisted
//! and every later call resolves it unchanged. The only sanctioned change
//! is `record_fallback` after a backend failure.
//!
//! ```text
//! initiate(id?) ──► exists? ──yes──► stored triple
//!                      │
//!                      no
//!                      ▼
//!   active_tier ─► draw selector ─► tier_for_selector ─► set_session
//! ```

pub mod error;
pub mod router;

pub use error::{RouteError, RouteResult};
pub use router::{Assignment, RoutingPolicy, SessionRouter};
