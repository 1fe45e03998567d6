//! modelgate-load — load signals for the capacity controller.
//!
//! A [`LoadSignalProvider`] returns a non-negative magnitude where larger
//! means more demand. Consecutive samples from one provider are
//! comparable; samples from different providers are not.
//!
//! # Providers
//!
//! | Provider | Magnitude |
//! |---|---|
//! | [`LogVolumeSignal`] | bytes appended to a log directory within the window |
//! | [`RequestRateSignal`] | requests recorded within the window |

pub mod log_volume;
pub mod request_rate;
pub mod signal;

pub use log_volume::LogVolumeSignal;
pub use request_rate::RequestRateSignal;
pub use signal::{LoadSignalProvider, SignalError, SignalResult};
