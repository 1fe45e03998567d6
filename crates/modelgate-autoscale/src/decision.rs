//! Pure scaling decisions over a tier-state snapshot.

use serde::Serialize;

use modelgate_core::Tier;
use modelgate_state::TierState;

/// What the controller should do about the current load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDecision {
    /// Warm the small tier and route new sessions to it.
    ScaleUp,
    /// Retire the small tier.
    ScaleDown,
    /// No change needed.
    NoChange,
}

/// Load is above the current threshold and small is not yet taking new
/// sessions.
pub fn wants_scale_up(state: &TierState, magnitude: u64) -> bool {
    magnitude > state.threshold && state.active_tier != Tier::Small
}

/// Load is below the baseline, small is up, and nothing is pinned to it.
pub fn wants_scale_down(state: &TierState, magnitude: u64, small_sessions: usize) -> bool {
    magnitude < state.threshold_baseline && state.small_tier_active && small_sessions == 0
}

/// Combined decision. Scale-up wins when both hold.
pub fn decide(state: &TierState, magnitude: u64, small_sessions: usize) -> ScaleDecision {
    if wants_scale_up(state, magnitude) {
        ScaleDecision::ScaleUp
    } else if wants_scale_down(state, magnitude, small_sessions) {
        ScaleDecision::ScaleDown
    } else {
        ScaleDecision::NoChange
    }
}
