//! Capacity controller — load-driven tier transitions.
//!
//! Two independent poll loops share one controller. The scale-up loop
//! warms the small tier when load crosses the threshold; the scale-down
//! loop retires it once load is back under the baseline and no session is
//! pinned to it. At most one transition runs at a time, and a pending
//! scale-up makes scale-down stand aside.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use modelgate_core::Tier;
use modelgate_core::config::CapacityConfig;
use modelgate_load::{LoadSignalProvider, SignalError};
use modelgate_state::{ModelStateStore, StateError, TierPhase, TierState, epoch_millis};

use crate::decision::{ScaleDecision, decide, wants_scale_up};
use crate::provisioner::TierProvisioner;

const NO_SAMPLE: u64 = u64::MAX;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("{tier} tier warm-up failed: {reason}")]
    WarmupFailed { tier: Tier, reason: String },

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Poll cadence and readiness slack.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub scale_up_interval: Duration,
    pub scale_down_interval: Duration,
    /// Added to the provisioner's declared latency to bound each
    /// readiness or teardown call.
    pub readiness_grace: Duration,
}

impl ControllerConfig {
    pub fn from_config(config: &CapacityConfig) -> Self {
        Self {
            scale_up_interval: config.scale_up_interval(),
            scale_down_interval: config.scale_down_interval(),
            readiness_grace: config.readiness_grace(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_config(&CapacityConfig::default())
    }
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing to do.
    Idle,
    /// Small tier took over new sessions.
    ScaledUp(TierState),
    /// Small tier retired.
    ScaledDown(TierState),
    /// Another transition holds the guard.
    InFlight,
    /// Scale-down yielded to a pending scale-up.
    Deferred,
    /// Conditions changed while the transition was being prepared.
    Superseded,
}

/// Point-in-time view for operators.
#[derive(Debug, Clone, Serialize)]
pub struct CapacityStatus {
    pub tier_state: TierState,
    pub phase: TierPhase,
    pub small_sessions: usize,
    pub last_magnitude: Option<u64>,
    pub transition_in_flight: bool,
    pub scale_up_pending: bool,
    pub signal: &'static str,
}

/// Drives tier transitions from a load signal.
///
/// Cheap to clone; clones share the same guards.
#[derive(Clone)]
pub struct CapacityController {
    inner: Arc<Inner>,
}

struct Inner {
    store: ModelStateStore,
    signal: Arc<dyn LoadSignalProvider>,
    provisioner: Arc<dyn TierProvisioner>,
    config: ControllerConfig,
    /// Held for the whole of a transition.
    transition: Mutex<()>,
    /// Held only around tier-state read-modify-write.
    commit: Mutex<()>,
    /// Set while the scale-up loop wants (or is running) a scale-up.
    surge: AtomicBool,
    last_magnitude: AtomicU64,
}

/// Clears the surge flag when a scale-up attempt ends.
struct SurgeGuard<'a>(&'a AtomicBool);

impl Drop for SurgeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CapacityController {
    pub fn new(
        store: ModelStateStore,
        signal: Arc<dyn LoadSignalProvider>,
        provisioner: Arc<dyn TierProvisioner>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                signal,
                provisioner,
                config,
                transition: Mutex::new(()),
                commit: Mutex::new(()),
                surge: AtomicBool::new(false),
                last_magnitude: AtomicU64::new(NO_SAMPLE),
            }),
        }
    }

    pub fn store(&self) -> &ModelStateStore {
        &self.inner.store
    }

    /// One scale-up poll.
    pub async fn scale_up_step(&self) -> Result<StepOutcome, ControllerError> {
        let magnitude = self.sample()?;
        let state = self.inner.store.tier_state()?;

        if !wants_scale_up(&state, magnitude) {
            self.inner.surge.store(false, Ordering::SeqCst);
            debug!(magnitude, threshold = state.threshold, "load within threshold");
            return Ok(StepOutcome::Idle);
        }

        self.inner.surge.store(true, Ordering::SeqCst);
        let Ok(_transition) = self.inner.transition.try_lock() else {
            debug!("transition already in flight, skipping scale-up");
            return Ok(StepOutcome::InFlight);
        };
        let _surge = SurgeGuard(&self.inner.surge);

        info!(
            magnitude,
            threshold = state.threshold,
            signal = self.inner.signal.name(),
            "load above threshold, scaling up"
        );

        // Large first so fallback has somewhere to go.
        self.ready(Tier::Large).await?;
        self.ready(Tier::Small).await?;

        let _commit = self.inner.commit.lock().await;
        let current = self.inner.store.tier_state()?;
        if current.active_tier == Tier::Small {
            debug!("small tier already active, nothing to commit");
            return Ok(StepOutcome::Superseded);
        }
        let next = current.escalated(epoch_millis());
        self.inner.store.put_tier_state(&next)?;
        info!(threshold = next.threshold, "scaled up: small tier takes new sessions");
        Ok(StepOutcome::ScaledUp(next))
    }

    /// One scale-down poll.
    pub async fn scale_down_step(&self) -> Result<StepOutcome, ControllerError> {
        let store = &self.inner.store;
        match store.purge_expired() {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "purged expired sessions"),
            Err(e) => warn!(error = %e, "expired-session purge failed"),
        }

        let magnitude = self.sample()?;
        let state = store.tier_state()?;
        let small_sessions = store.count_sessions_on(Tier::Small)?;

        match decide(&state, magnitude, small_sessions) {
            ScaleDecision::NoChange => {
                debug!(magnitude, small_sessions, "no scale-down");
                return Ok(StepOutcome::Idle);
            }
            ScaleDecision::ScaleUp => return Ok(StepOutcome::Deferred),
            ScaleDecision::ScaleDown => {}
        }
        if self.inner.surge.load(Ordering::SeqCst) {
            debug!("scale-up pending, deferring scale-down");
            return Ok(StepOutcome::Deferred);
        }
        let Ok(_transition) = self.inner.transition.try_lock() else {
            debug!("transition already in flight, skipping scale-down");
            return Ok(StepOutcome::InFlight);
        };

        // Stop new small assignments before counting again.
        let prior = {
            let _commit = self.inner.commit.lock().await;
            let current = store.tier_state()?;
            let sessions = store.count_sessions_on(Tier::Small)?;
            if self.inner.surge.load(Ordering::SeqCst)
                || decide(&current, magnitude, sessions) != ScaleDecision::ScaleDown
            {
                return Ok(StepOutcome::Superseded);
            }
            store.put_tier_state(&current.draining(epoch_millis()))?;
            current
        };
        info!(magnitude, baseline = prior.threshold_baseline, "load below baseline, draining small tier");

        match store.count_sessions_on(Tier::Small) {
            Ok(0) => {}
            Ok(late) => {
                info!(late, "sessions landed on small tier while draining, aborting scale-down");
                self.restore(&prior).await?;
                return Ok(StepOutcome::Superseded);
            }
            Err(e) => {
                self.restore(&prior).await?;
                return Err(e.into());
            }
        }

        if let Err(e) = self.stop(Tier::Small).await {
            self.restore(&prior).await?;
            return Err(e);
        }

        let _commit = self.inner.commit.lock().await;
        let next = store.tier_state()?.relaxed(epoch_millis());
        store.put_tier_state(&next)?;
        info!(threshold = next.threshold, "scaled down: small tier retired");
        Ok(StepOutcome::ScaledDown(next))
    }

    /// Run both poll loops until `shutdown` flips or its sender drops.
    ///
    /// A transition already under way finishes before its loop exits.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let up = tokio::spawn(self.clone().scale_up_loop(shutdown.clone()));
        let down = tokio::spawn(self.clone().scale_down_loop(shutdown));
        let (up, down) = tokio::join!(up, down);
        for joined in [up, down] {
            if let Err(e) = joined {
                error!(error = %e, "capacity loop panicked");
            }
        }
    }

    async fn scale_up_loop(self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.inner.config.scale_up_interval;
        info!(
            interval_ms = interval.as_millis() as u64,
            signal = self.inner.signal.name(),
            "scale-up watcher started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.scale_up_step().await {
                        Ok(outcome) => debug!(?outcome, "scale-up poll"),
                        Err(e) => error!(error = %e, "scale-up poll failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("scale-up watcher shutting down");
                    break;
                }
            }
        }
    }

    async fn scale_down_loop(self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.inner.config.scale_down_interval;
        info!(interval_ms = interval.as_millis() as u64, "scale-down watcher started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.scale_down_step().await {
                        Ok(outcome) => debug!(?outcome, "scale-down poll"),
                        Err(e) => error!(error = %e, "scale-down poll failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("scale-down watcher shutting down");
                    break;
                }
            }
        }
    }

    pub fn status(&self) -> Result<CapacityStatus, ControllerError> {
        let tier_state = self.inner.store.tier_state()?;
        let small_sessions = self.inner.store.count_sessions_on(Tier::Small)?;
        let last = self.inner.last_magnitude.load(Ordering::SeqCst);
        Ok(CapacityStatus {
            phase: tier_state.phase(),
            tier_state,
            small_sessions,
            last_magnitude: (last != NO_SAMPLE).then_some(last),
            transition_in_flight: self.inner.transition.try_lock().is_err(),
            scale_up_pending: self.inner.surge.load(Ordering::SeqCst),
            signal: self.inner.signal.name(),
        })
    }

    fn sample(&self) -> Result<u64, ControllerError> {
        let magnitude = self.inner.signal.sample()?;
        self.inner.last_magnitude.store(magnitude, Ordering::SeqCst);
        Ok(magnitude)
    }

    async fn ready(&self, tier: Tier) -> Result<(), ControllerError> {
        let provisioner = &self.inner.provisioner;
        let limit = provisioner.ready_latency(tier) + self.inner.config.readiness_grace;
        match tokio::time::timeout(limit, provisioner.ensure_ready(tier)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(%tier, error = %e, "tier warm-up failed");
                Err(ControllerError::WarmupFailed {
                    tier,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                warn!(%tier, limit_ms = limit.as_millis() as u64, "tier warm-up timed out");
                Err(ControllerError::WarmupFailed {
                    tier,
                    reason: format!("not ready within {}ms", limit.as_millis()),
                })
            }
        }
    }

    async fn stop(&self, tier: Tier) -> Result<(), ControllerError> {
        let provisioner = &self.inner.provisioner;
        let limit = provisioner.teardown_latency(tier) + self.inner.config.readiness_grace;
        match tokio::time::timeout(limit, provisioner.teardown(tier)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ControllerError::WarmupFailed {
                tier,
                reason: e.to_string(),
            }),
            Err(_) => Err(ControllerError::WarmupFailed {
                tier,
                reason: format!("teardown exceeded {}ms", limit.as_millis()),
            }),
        }
    }

    async fn restore(&self, prior: &TierState) -> Result<(), ControllerError> {
        let _commit = self.inner.commit.lock().await;
        let restored = TierState {
            updated_at_ms: epoch_millis(),
            ..prior.clone()
        };
        self.inner.store.put_tier_state(&restored)?;
        warn!("scale-down abandoned, small tier restored");
        Ok(())
    }
}
