//! Log-volume load signal.
//!
//! Request handling writes log lines into a directory; the bytes appended
//! there over a short window track traffic. Each sample totals the size of
//! the files directly inside the directory and reports growth since the
//! newest sample at least one window old. Until such a sample exists the
//! first retained sample is the baseline, so a caller polling less often
//! than the window still sees growth between consecutive polls.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;
use walkdir::WalkDir;

use crate::signal::{LoadSignalProvider, SignalError, SignalResult};

pub struct LogVolumeSignal {
    dir: PathBuf,
    window: Duration,
    /// (sample time, directory total) pairs, oldest first.
    history: Mutex<VecDeque<(Instant, u64)>>,
}

impl LogVolumeSignal {
    pub fn new(dir: impl Into<PathBuf>, window: Duration) -> Self {
        Self {
            dir: dir.into(),
            window,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Total bytes of regular files directly inside the directory.
    pub fn directory_size(&self) -> SignalResult<u64> {
        let mut total = 0u64;
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                // The root itself being unreadable is fatal for this sample.
                Err(e) if e.depth() == 0 => return Err(SignalError::Io(e.to_string())),
                Err(e) => {
                    debug!(error = %e, "skipping unreadable log entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            // Files can vanish between listing and stat (rotation).
            match entry.metadata() {
                Ok(meta) => total = total.saturating_add(meta.len()),
                Err(e) => debug!(error = %e, path = ?entry.path(), "skipping log file"),
            }
        }
        Ok(total)
    }
}

impl LoadSignalProvider for LogVolumeSignal {
    fn sample(&self) -> SignalResult<u64> {
        if !self.dir.is_dir() {
            return Err(SignalError::Io(format!(
                "{} is not a directory",
                self.dir.display()
            )));
        }
        let total = self.directory_size()?;
        let now = Instant::now();

        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        // Shrinking means files were removed; restart the window.
        if history.back().is_some_and(|(_, last)| total < *last) {
            history.clear();
        }
        history.push_back((now, total));
        // Keep exactly one sample at or beyond the window edge as baseline.
        while history
            .get(1)
            .is_some_and(|(at, _)| now.duration_since(*at) >= self.window)
        {
            history.pop_front();
        }
        let baseline = history.front().map(|(_, size)| *size).unwrap_or(total);
        let growth = total.saturating_sub(baseline);
        debug!(dir = ?self.dir, total, growth, "log volume sampled");
        Ok(growth)
    }

    fn name(&self) -> &'static str {
        "log_volume"
    }
}
