//! ModelStateStore — typed access to tier state and session assignments.
//!
//! Sits on a `KvStore` and turns its single-key operations into the
//! guarantees routing needs: a session is assigned once, re-assignment
//! with different arguments is refused, and the tier state is always
//! written as one record.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use modelgate_core::{Selector, Tier};

use crate::error::{StateError, StateResult};
use crate::kv::{KvStore, RedbKv, epoch_millis, expiry_from_now};
use crate::types::*;

/// Compare-and-set attempts before giving up under contention.
const CAS_ATTEMPTS: usize = 8;

/// Shared handle to routing state. Cheap to clone.
#[derive(Clone)]
pub struct ModelStateStore {
    kv: Arc<dyn KvStore>,
}

impl ModelStateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        Ok(Self::with_kv(Arc::new(RedbKv::open(path)?)))
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        Ok(Self::with_kv(Arc::new(RedbKv::open_in_memory()?)))
    }

    /// Wrap any key-value backend.
    pub fn with_kv(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Check that the backend answers.
    pub fn ping(&self) -> StateResult<()> {
        self.kv.ping()
    }

    // ── Tier state ─────────────────────────────────────────────────

    /// Create the tier state record if absent and return the stored one.
    ///
    /// An existing record is kept as-is, so restarts never reset a
    /// scaled-up deployment.
    pub fn bootstrap(&self, threshold_baseline: u64) -> StateResult<TierState> {
        let initial = TierState::bootstrap(threshold_baseline, epoch_millis());
        let bytes = encode(&initial)?;
        if self.kv.compare_and_set(TIER_STATE_KEY, None, &bytes, None)? {
            info!(
                active_tier = %initial.active_tier,
                threshold = initial.threshold,
                "tier state initialised"
            );
            return Ok(initial);
        }
        let existing = self.tier_state()?;
        info!(
            active_tier = %existing.active_tier,
            threshold = existing.threshold,
            baseline = existing.threshold_baseline,
            "tier state already present"
        );
        Ok(existing)
    }

    /// Read the current tier state.
    pub fn tier_state(&self) -> StateResult<TierState> {
        match self.kv.get(TIER_STATE_KEY)? {
            Some(bytes) => decode(&bytes),
            None => Err(StateError::Uninitialized),
        }
    }

    /// Replace the tier state record in one write.
    ///
    /// Callers must serialise writers themselves; the capacity controller
    /// holds its commit lock around every call.
    pub fn put_tier_state(&self, state: &TierState) -> StateResult<()> {
        state.validate().map_err(StateError::InvalidTierState)?;
        let bytes = encode(state)?;
        self.kv.set(TIER_STATE_KEY, &bytes)?;
        debug!(
            active_tier = %state.active_tier,
            small_tier_active = state.small_tier_active,
            threshold = state.threshold,
            "tier state stored"
        );
        Ok(())
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Assign a session once.
    ///
    /// Repeating the call with the same selector and tier returns the
    /// stored record unchanged. Different arguments for a live session
    /// fail with `SessionConflict`.
    pub fn set_session(
        &self,
        session_id: &str,
        selector: Selector,
        tier: Tier,
        ttl: Duration,
    ) -> StateResult<SessionRecord> {
        let key = session_key(session_id);
        for _ in 0..CAS_ATTEMPTS {
            if let Some(existing) = self.get_session(session_id)? {
                if existing.same_assignment(selector, tier) {
                    return Ok(existing);
                }
                return Err(StateError::SessionConflict {
                    session_id: session_id.to_string(),
                    existing: existing.tier,
                    existing_selector: existing.selector.value(),
                    requested: tier,
                    requested_selector: selector.value(),
                });
            }

            let now = epoch_millis();
            let record = SessionRecord {
                session_id: session_id.to_string(),
                selector,
                tier,
                created_at_ms: now,
                expires_at_ms: expiry_from_now(ttl),
            };
            let bytes = encode(&record)?;
            if self
                .kv
                .compare_and_set(&key, None, &bytes, Some(record.expires_at_ms))?
            {
                debug!(%session_id, %selector, %tier, "session assigned");
                return Ok(record);
            }
            // Lost a race with another writer; re-read and compare.
        }
        Err(StateError::StoreUnavailable(format!(
            "compare-and-set contention on {key}"
        )))
    }

    /// Live session record, or `None` when absent or expired.
    pub fn get_session(&self, session_id: &str) -> StateResult<Option<SessionRecord>> {
        match self.kv.get(&session_key(session_id))? {
            Some(bytes) => {
                let record: SessionRecord = decode(&bytes)?;
                // The backend already hides expired keys; this guards
                // backends with coarser expiry.
                Ok((!record.is_expired(epoch_millis())).then_some(record))
            }
            None => Ok(None),
        }
    }

    /// Move a live session to another tier, keeping selector and expiry.
    pub fn rebind_session(&self, session_id: &str, tier: Tier) -> StateResult<SessionRecord> {
        let key = session_key(session_id);
        for _ in 0..CAS_ATTEMPTS {
            let raw = self
                .kv
                .get(&key)?
                .ok_or_else(|| StateError::SessionNotFound(session_id.to_string()))?;
            let current: SessionRecord = decode(&raw)?;
            if current.is_expired(epoch_millis()) {
                return Err(StateError::SessionNotFound(session_id.to_string()));
            }
            if current.tier == tier {
                return Ok(current);
            }
            let updated = SessionRecord {
                tier,
                ..current.clone()
            };
            let bytes = encode(&updated)?;
            if self
                .kv
                .compare_and_set(&key, Some(&raw), &bytes, Some(updated.expires_at_ms))?
            {
                info!(
                    %session_id,
                    from = %current.tier,
                    to = %tier,
                    "session rebound to fallback tier"
                );
                return Ok(updated);
            }
        }
        Err(StateError::StoreUnavailable(format!(
            "compare-and-set contention on {key}"
        )))
    }

    /// End a session. Returns true if a live record was removed.
    pub fn delete_session(&self, session_id: &str) -> StateResult<bool> {
        let existed = self.kv.delete(&session_key(session_id))?;
        debug!(%session_id, existed, "session deleted");
        Ok(existed)
    }

    /// All live sessions.
    pub fn live_sessions(&self) -> StateResult<Vec<SessionRecord>> {
        let now = epoch_millis();
        let mut results = Vec::new();
        for (_, bytes) in self.kv.scan_prefix(SESSION_PREFIX)? {
            let record: SessionRecord = decode(&bytes)?;
            if !record.is_expired(now) {
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Number of live sessions currently pinned to `tier`.
    pub fn count_sessions_on(&self, tier: Tier) -> StateResult<usize> {
        Ok(self
            .live_sessions()?
            .iter()
            .filter(|s| s.tier == tier)
            .count())
    }

    /// Reclaim space held by expired records.
    pub fn purge_expired(&self) -> StateResult<u32> {
        self.kv.purge_expired()
    }
}

fn encode<T: serde::Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StateError::Codec(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StateError::Codec(e.to_string()))
}
