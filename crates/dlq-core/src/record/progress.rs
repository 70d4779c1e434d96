//! Progress reporting for downloads (bytes done, ETA, rate).
//!
//! Consumers get rate = bytes_this_run / elapsed_secs and
//! ETA = (expected - received) / rate.

use std::time::Instant;

/// Snapshot of download progress for one record.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ProgressStats {
    /// Bytes of the artifact received so far, including earlier runs.
    pub bytes_received: u64,
    /// Total artifact size, if the transport has reported it.
    pub bytes_expected: Option<u64>,
    /// Bytes received since the current run was admitted.
    pub bytes_this_run: u64,
    /// Seconds since the current run was admitted (0 when not running).
    pub elapsed_secs: f64,
}

impl ProgressStats {
    /// Fraction complete in [0.0, 1.0]; 0 while the expected size is unknown.
    pub fn fraction(&self) -> f64 {
        ratio(self.bytes_received, self.bytes_expected)
    }

    /// Download rate of the current run in bytes per second (0 if elapsed is 0).
    pub fn bytes_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.bytes_this_run as f64 / self.elapsed_secs
    }

    /// Estimated seconds remaining (None if size or rate is unknown).
    pub fn eta_secs(&self) -> Option<f64> {
        let expected = self.bytes_expected?;
        let remaining = expected.saturating_sub(self.bytes_received);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.bytes_per_sec();
        if rate <= 0.0 {
            return None;
        }
        Some(remaining as f64 / rate)
    }
}

/// Received/expected clamped to [0, 1]; 0 when expected is unknown, 1 for
/// an empty artifact.
pub fn ratio(received: u64, expected: Option<u64>) -> f64 {
    match expected {
        Some(0) => 1.0,
        Some(total) => (received as f64 / total as f64).clamp(0.0, 1.0),
        None => 0.0,
    }
}

/// Per-run counters kept on a record while it is active.
#[derive(Debug, Clone)]
pub(crate) struct RunClock {
    started: Instant,
    bytes_at_start: u64,
}

impl RunClock {
    pub(crate) fn start(bytes_at_start: u64) -> Self {
        Self {
            started: Instant::now(),
            bytes_at_start,
        }
    }

    /// Moves the baseline, e.g. when the transport reports the resume offset.
    pub(crate) fn rebase(&mut self, bytes_at_start: u64) {
        self.bytes_at_start = bytes_at_start;
    }

    pub(crate) fn stats(&self, bytes_received: u64, bytes_expected: Option<u64>) -> ProgressStats {
        ProgressStats {
            bytes_received,
            bytes_expected,
            bytes_this_run: bytes_received.saturating_sub(self.bytes_at_start),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}
