//! Persisted records: the deployment-wide tier state and per-session
//! assignments. Both are JSON-encoded into the key-value layer.

use serde::{Deserialize, Serialize};

use modelgate_core::{Selector, Tier};

/// Key holding the single `TierState` record.
pub const TIER_STATE_KEY: &str = "tier_state";

/// Prefix for session records (`session:{id}`).
pub const SESSION_PREFIX: &str = "session:";

/// Coarse phase of the tier state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierPhase {
    /// Only the large tier takes new sessions.
    LargeOnly,
    /// The small tier is warm and takes new sessions.
    SmallActive,
}

/// Which tier takes new sessions, and the load threshold that moves it.
///
/// Written only by the capacity controller. Each transition produces a
/// whole new record, so a tier flip and its threshold change land in a
/// single write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierState {
    pub active_tier: Tier,
    pub small_tier_active: bool,
    pub large_tier_active: bool,
    /// Load magnitude above which scale-up triggers.
    pub threshold: u64,
    /// Value `threshold` returns to on scale-down.
    pub threshold_baseline: u64,
    /// Unix milliseconds of the last write.
    pub updated_at_ms: u64,
}

impl TierState {
    /// Initial state: large tier only, possibly still cold.
    pub fn bootstrap(threshold_baseline: u64, now_ms: u64) -> Self {
        Self {
            active_tier: Tier::Large,
            small_tier_active: false,
            large_tier_active: false,
            threshold: threshold_baseline,
            threshold_baseline,
            updated_at_ms: now_ms,
        }
    }

    pub fn phase(&self) -> TierPhase {
        if self.active_tier == Tier::Small && self.small_tier_active {
            TierPhase::SmallActive
        } else {
            TierPhase::LargeOnly
        }
    }

    /// Both tiers warm, small takes new sessions, threshold doubled.
    ///
    /// From a draining record the threshold is already doubled and is kept.
    pub fn escalated(&self, now_ms: u64) -> Self {
        let threshold = if self.small_tier_active {
            self.threshold
        } else {
            self.threshold.saturating_mul(2)
        };
        Self {
            active_tier: Tier::Small,
            small_tier_active: true,
            large_tier_active: true,
            threshold,
            threshold_baseline: self.threshold_baseline,
            updated_at_ms: now_ms,
        }
    }

    /// New sessions go back to large while the small tier is still up.
    pub fn draining(&self, now_ms: u64) -> Self {
        Self {
            active_tier: Tier::Large,
            updated_at_ms: now_ms,
            ..self.clone()
        }
    }

    /// Small tier gone, threshold back at baseline.
    pub fn relaxed(&self, now_ms: u64) -> Self {
        Self {
            active_tier: Tier::Large,
            small_tier_active: false,
            large_tier_active: self.large_tier_active,
            threshold: self.threshold_baseline,
            threshold_baseline: self.threshold_baseline,
            updated_at_ms: now_ms,
        }
    }

    /// Check the invariants a persisted record must hold.
    pub fn validate(&self) -> Result<(), String> {
        if self.threshold < self.threshold_baseline {
            return Err(format!(
                "threshold {} below baseline {}",
                self.threshold, self.threshold_baseline
            ));
        }
        if self.active_tier == Tier::Small && !self.small_tier_active {
            return Err("small tier active for new sessions but not warm".to_string());
        }
        Ok(())
    }
}

/// A session's routing assignment.
///
/// `selector` never changes. `tier` changes only through an explicit
/// fallback after a backend failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub selector: Selector,
    pub tier: Tier,
    pub created_at_ms: u64,
    /// Unix milliseconds after which the record is stale.
    pub expires_at_ms: u64,
}

impl SessionRecord {
    /// Build the key for this session.
    pub fn table_key(&self) -> String {
        session_key(&self.session_id)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms <= now_ms
    }

    /// Same selector and tier as `other`, ignoring timestamps.
    pub fn same_assignment(&self, selector: Selector, tier: Tier) -> bool {
        self.selector == selector && self.tier == tier
    }
}

/// Key for a session id.
pub fn session_key(session_id: &str) -> String {
    format!("{SESSION_PREFIX}{session_id}")
}
