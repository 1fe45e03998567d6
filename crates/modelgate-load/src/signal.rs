//! The load signal contract.

use thiserror::Error;

pub type SignalResult<T> = Result<T, SignalError>;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("load source unreadable: {0}")]
    Io(String),
}

/// Periodic sampler of current demand.
///
/// `sample` only measures. Implementations may keep bookkeeping between
/// calls (a sliding window) but must not change what they measure.
pub trait LoadSignalProvider: Send + Sync {
    /// Current magnitude. Larger means more load.
    fn sample(&self) -> SignalResult<u64>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}
