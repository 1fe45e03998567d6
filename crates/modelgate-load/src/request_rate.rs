//! Request-rate load signal.
//!
//! The request path calls `record()` once per inference request; the
//! magnitude is the number of requests seen within the window.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::signal::{LoadSignalProvider, SignalResult};

pub struct RequestRateSignal {
    window: Duration,
    arrivals: Mutex<VecDeque<Instant>>,
}

impl RequestRateSignal {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            arrivals: Mutex::new(VecDeque::new()),
        }
    }

    /// Count one request now.
    pub fn record(&self) {
        let now = Instant::now();
        let mut arrivals = self.arrivals.lock().unwrap_or_else(PoisonError::into_inner);
        arrivals.push_back(now);
        prune(&mut arrivals, now, self.window);
    }
}

fn prune(arrivals: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(at) = arrivals.front() {
        if now.duration_since(*at) > window {
            arrivals.pop_front();
        } else {
            break;
        }
    }
}

impl LoadSignalProvider for RequestRateSignal {
    fn sample(&self) -> SignalResult<u64> {
        let mut arrivals = self.arrivals.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut arrivals, Instant::now(), self.window);
        Ok(arrivals.len() as u64)
    }

    fn name(&self) -> &'static str {
        "request_rate"
    }
}
