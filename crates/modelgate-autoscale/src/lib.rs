//! modelgate-autoscale — load-driven tier capacity.
//!
//! Samples a [`LoadSignalProvider`](modelgate_load::LoadSignalProvider),
//! compares it with the threshold in the persisted `TierState`, and moves
//! new sessions between the large and small tiers.
//!
//! # Transitions
//!
//! ```text
//! LARGE_ONLY ──(load > threshold)──► warm large, warm small
//!                                    commit { active = small, threshold *= 2 }
//!                                                   │
//!                                                   ▼
//!                                              SMALL_ACTIVE
//!                                                   │
//!    (load < baseline && no live session pinned to small)
//!                                                   ▼
//!               commit { active = large }  (draining; recount sessions)
//!               teardown small
//!               commit { small off, threshold = baseline }
//! ```
//!
//! Scale-up and scale-down run on separate intervals. A single transition
//! guard keeps them from overlapping, and a pending scale-up makes the
//! scale-down loop defer. Readiness and teardown calls are bounded by the
//! provisioner's declared latency plus a grace period; a failure leaves
//! the tier state as it was and the next poll retries.

pub mod controller;
pub mod decision;
pub mod provisioner;

pub use controller::{
    CapacityController, CapacityStatus, ControllerConfig, ControllerError, StepOutcome,
};
pub use decision::{ScaleDecision, decide};
pub use provisioner::{ProvisionError, SimulatedProvisioner, TierProvisioner};
