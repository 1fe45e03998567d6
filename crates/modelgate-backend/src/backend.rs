//! Inference backends, one per tier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use modelgate_core::Tier;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("{tier} backend unavailable: {reason}")]
    Unavailable { tier: Tier, reason: String },
}

/// A model endpoint serving one tier.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn tier(&self) -> Tier;

    /// Run one completion for `session_id`.
    async fn complete(&self, session_id: &str, message: &str) -> Result<String, BackendError>;
}

/// Backend that answers after a fixed delay by echoing the message.
pub struct SimulatedBackend {
    tier: Tier,
    latency: Duration,
    healthy: AtomicBool,
}

impl SimulatedBackend {
    pub fn new(tier: Tier, latency: Duration) -> Self {
        Self {
            tier,
            latency,
            healthy: AtomicBool::new(true),
        }
    }

    /// Make later calls fail (or succeed again).
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl InferenceBackend for SimulatedBackend {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn complete(&self, session_id: &str, message: &str) -> Result<String, BackendError> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable {
                tier: self.tier,
                reason: "backend marked unhealthy".into(),
            });
        }
        tokio::time::sleep(self.latency).await;
        debug!(tier = %self.tier, %session_id, "completion served");
        Ok(format!(
            "{} model response for session {session_id}: {message}",
            self.tier.label()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_message_with_tier_label() {
        let backend = SimulatedBackend::new(Tier::Small, Duration::from_millis(1));
        let text = backend.complete("abc", "hello").await.unwrap();
        assert_eq!(text, "Small model response for session abc: hello");
    }

    #[tokio::test]
    async fn unhealthy_backend_fails() {
        let backend = SimulatedBackend::new(Tier::Large, Duration::ZERO);
        backend.set_healthy(false);
        assert!(matches!(
            backend.complete("abc", "hi").await,
            Err(BackendError::Unavailable { tier: Tier::Large, .. })
        ));
        backend.set_healthy(true);
        assert!(backend.complete("abc", "hi").await.is_ok());
    }
}
