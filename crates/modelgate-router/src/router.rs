//! Session router — assigns a session to a tier once and resolves it on
//! every later call.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use modelgate_core::{SELECTOR_SPACE, Selector, Tier, tier_for_selector};
use modelgate_state::{ModelStateStore, SessionRecord, StateError};

use crate::error::{RouteError, RouteResult};

/// Longest accepted caller-supplied session id.
const MAX_SESSION_ID_LEN: usize = 256;

/// Routing knobs applied at assignment time.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    /// Lifetime of a session record.
    pub session_ttl: Duration,
    /// Selectors below this value go to the small tier while it is active.
    pub small_slots: u8,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(3600),
            small_slots: SELECTOR_SPACE,
        }
    }
}

/// A session's resolved placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub session_id: String,
    pub selector: Selector,
    pub tier: Tier,
    pub expires_at_ms: u64,
}

impl From<SessionRecord> for Assignment {
    fn from(record: SessionRecord) -> Self {
        Self {
            session_id: record.session_id,
            selector: record.selector,
            tier: record.tier,
            expires_at_ms: record.expires_at_ms,
        }
    }
}

/// Assigns sessions to tiers through the shared state store.
#[derive(Clone)]
pub struct SessionRouter {
    store: ModelStateStore,
    policy: RoutingPolicy,
}

impl SessionRouter {
    pub fn new(store: ModelStateStore, policy: RoutingPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &ModelStateStore {
        &self.store
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Start (or rejoin) a session.
    ///
    /// Generates an id when none is given. A live session is returned
    /// exactly as stored; a new one reads the active tier, draws a
    /// selector and persists the triple.
    pub fn initiate(&self, session_id: Option<&str>) -> RouteResult<Assignment> {
        let session_id = match session_id {
            Some(id) => validate_session_id(id)?.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        if let Some(existing) = self.store.get_session(&session_id)? {
            debug!(%session_id, tier = %existing.tier, "session already assigned");
            return Ok(existing.into());
        }

        let state = self.store.tier_state()?;
        let selector = draw_selector()?;
        let tier = tier_for_selector(selector, state.active_tier, self.policy.small_slots);

        match self
            .store
            .set_session(&session_id, selector, tier, self.policy.session_ttl)
        {
            Ok(record) => {
                let record = self.confirm_small_pin(record)?;
                info!(%session_id, %selector, tier = %record.tier, "session initiated");
                Ok(record.into())
            }
            Err(StateError::SessionConflict { .. }) => {
                // A concurrent initiate for the same id got there first.
                debug!(%session_id, "lost initiate race, returning stored assignment");
                self.store
                    .get_session(&session_id)?
                    .map(Assignment::from)
                    .ok_or_else(|| StateError::SessionNotFound(session_id).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-check a fresh small-tier pin against the tier state.
    ///
    /// The tier state may have moved off small between the read that chose
    /// the tier and the write. A drain that began in that gap has already
    /// counted small sessions, so the new pin moves to large.
    fn confirm_small_pin(&self, record: SessionRecord) -> RouteResult<SessionRecord> {
        if record.tier != Tier::Small {
            return Ok(record);
        }
        let state = self.store.tier_state()?;
        if state.active_tier == Tier::Small {
            return Ok(record);
        }
        debug!(session_id = %record.session_id, "small tier draining, moving new session to large");
        Ok(self.store.rebind_session(&record.session_id, Tier::Large)?)
    }

    /// Look up a live session's placement.
    pub fn resolve(&self, session_id: &str) -> RouteResult<Assignment> {
        self.store
            .get_session(session_id)?
            .map(Assignment::from)
            .ok_or_else(|| StateError::SessionNotFound(session_id.to_string()).into())
    }

    /// Pin a session to `new_tier` after its backend failed.
    ///
    /// The selector and expiry are kept; only the tier moves.
    pub fn record_fallback(&self, session_id: &str, new_tier: Tier) -> RouteResult<Assignment> {
        let record = self.store.rebind_session(session_id, new_tier)?;
        warn!(%session_id, tier = %new_tier, "fallback recorded");
        Ok(record.into())
    }

    /// End a session explicitly. Returns true if it was live.
    pub fn terminate(&self, session_id: &str) -> RouteResult<bool> {
        let existed = self.store.delete_session(session_id)?;
        if existed {
            info!(%session_id, "session terminated");
        }
        Ok(existed)
    }

    /// Live sessions currently pinned to `tier`.
    pub fn pinned_to(&self, tier: Tier) -> RouteResult<usize> {
        Ok(self.store.count_sessions_on(tier)?)
    }
}

/// Uniform draw over the selector space.
fn draw_selector() -> RouteResult<Selector> {
    let mut byte = [0u8; 1];
    getrandom::getrandom(&mut byte).map_err(|e| RouteError::Entropy(e.to_string()))?;
    Ok(Selector::from_entropy(byte[0]))
}

fn validate_session_id(id: &str) -> RouteResult<&str> {
    if id.trim().is_empty() || id.trim() != id || id.len() > MAX_SESSION_ID_LEN {
        return Err(RouteError::InvalidSessionId(id.to_string()));
    }
    Ok(id)
}
