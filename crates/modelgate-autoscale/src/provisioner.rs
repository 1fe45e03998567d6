//! Tier provisioning capability.
//!
//! Bringing a tier up or down is slow (tens of seconds for small, minutes
//! for large) and may fail. The controller only needs the outcome and a
//! declared latency to size its timeouts.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use modelgate_core::Tier;
use modelgate_core::config::ProvisionerConfig;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("{tier} tier did not become ready: {reason}")]
    NotReady { tier: Tier, reason: String },

    #[error("{tier} tier teardown failed: {reason}")]
    TeardownFailed { tier: Tier, reason: String },
}

/// Brings backend tiers up and down.
#[async_trait]
pub trait TierProvisioner: Send + Sync {
    /// Expected time for `ensure_ready(tier)` from cold.
    fn ready_latency(&self, tier: Tier) -> Duration;

    /// Expected time for `teardown(tier)`.
    fn teardown_latency(&self, tier: Tier) -> Duration;

    /// Make `tier` ready to serve. A no-op when it already is.
    async fn ensure_ready(&self, tier: Tier) -> Result<(), ProvisionError>;

    /// Stop `tier`.
    async fn teardown(&self, tier: Tier) -> Result<(), ProvisionError>;
}

/// Provisioner that models warm-up and teardown as fixed delays.
pub struct SimulatedProvisioner {
    large_warmup: Duration,
    small_warmup: Duration,
    teardown: Duration,
    warm: Mutex<HashSet<Tier>>,
}

impl SimulatedProvisioner {
    pub fn new(large_warmup: Duration, small_warmup: Duration, teardown: Duration) -> Self {
        Self {
            large_warmup,
            small_warmup,
            teardown,
            warm: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_config(config: &ProvisionerConfig) -> Self {
        Self::new(config.large_warmup(), config.small_warmup(), config.teardown())
    }

    pub fn is_warm(&self, tier: Tier) -> bool {
        self.warm
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&tier)
    }
}

#[async_trait]
impl TierProvisioner for SimulatedProvisioner {
    fn ready_latency(&self, tier: Tier) -> Duration {
        match tier {
            Tier::Large => self.large_warmup,
            Tier::Small => self.small_warmup,
        }
    }

    fn teardown_latency(&self, _tier: Tier) -> Duration {
        self.teardown
    }

    async fn ensure_ready(&self, tier: Tier) -> Result<(), ProvisionError> {
        if self.is_warm(tier) {
            debug!(%tier, "tier already warm");
            return Ok(());
        }
        let latency = self.ready_latency(tier);
        info!(%tier, latency_ms = latency.as_millis() as u64, "warming tier");
        tokio::time::sleep(latency).await;
        self.warm
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tier);
        info!(%tier, "tier ready");
        Ok(())
    }

    async fn teardown(&self, tier: Tier) -> Result<(), ProvisionError> {
        info!(%tier, latency_ms = self.teardown.as_millis() as u64, "tearing down tier");
        tokio::time::sleep(self.teardown).await;
        self.warm
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&tier);
        info!(%tier, "tier stopped");
        Ok(())
    }
}
