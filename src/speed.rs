//! Sliding 5-second transfer-rate meter.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(5);

struct SpeedSample {
    at: Instant,
    bytes: u64,
}

/// Thread-safe queue of `(timestamp, bytes)` samples, reporting a fixed
/// 5-second-window throughput.
///
/// The window is fixed, not elapsed: `bytes_per_second` always divides by 5,
/// even if the meter has only been alive for less than that — matching the
/// distilled behaviour rather than a ramp-up-corrected average.
pub struct SpeedMeter {
    samples: Mutex<VecDeque<SpeedSample>>,
}

impl SpeedMeter {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Records `bytes` received now, and evicts samples older than the window.
    pub fn record(&self, bytes: u64) {
        let now = Instant::now();
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.push_back(SpeedSample { at: now, bytes });
        evict_stale(&mut samples, now);
    }

    /// Bytes per second averaged over the trailing 5-second window.
    pub fn bytes_per_second(&self) -> f64 {
        let now = Instant::now();
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        evict_stale(&mut samples, now);
        let total: u64 = samples.iter().map(|s| s.bytes).sum();
        total as f64 / WINDOW.as_secs_f64()
    }
}

impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new()
    }
}

fn evict_stale(samples: &mut VecDeque<SpeedSample>, now: Instant) {
    while let Some(front) = samples.front() {
        if now.duration_since(front.at) > WINDOW {
            samples.pop_front();
        } else {
            break;
        }
    }
}
