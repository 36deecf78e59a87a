//! Sliding-window failure rate, used to decide when a cached provider handle
//! should be thrown away and rebuilt.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

pub struct FailureWindow {
    window: Duration,
    samples: Mutex<VecDeque<(Instant, bool)>>,
}

impl FailureWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one request outcome (`true` = hard failure).
    pub fn record(&self, failed: bool) {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        Self::expire(&mut samples, now, self.window);
        samples.push_back((now, failed));
    }

    /// `(failures, total)` inside the window.
    pub fn counts(&self) -> (usize, usize) {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        Self::expire(&mut samples, Instant::now(), self.window);
        let failures = samples.iter().filter(|(_, failed)| *failed).count();
        (failures, samples.len())
    }

    /// Whether the failure rate is above `max_rate` with at least
    /// `min_samples` observations.
    pub fn exceeds(&self, max_rate: f64, min_samples: usize) -> bool {
        let (failures, total) = self.counts();
        total >= min_samples.max(1) && (failures as f64 / total as f64) > max_rate
    }

    fn expire(samples: &mut VecDeque<(Instant, bool)>, now: Instant, window: Duration) {
        while let Some((at, _)) = samples.front() {
            if now.duration_since(*at) > window {
                samples.pop_front();
            } else {
                break;
            }
        }
    }
}

impl std::fmt::Debug for FailureWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (failures, total) = self.counts();
        f.debug_struct("FailureWindow")
            .field("failures", &failures)
            .field("total", &total)
            .finish()
    }
}
