//! Throughput tracking, one instance per traffic direction.

use std::time::{Duration, Instant};

/// Rolling byte counter folded into a bits-per-second figure once per
/// measurement window.
///
/// `record` only accumulates; `sample` does the division when at least one
/// window has elapsed since the previous sample and is a no-op otherwise,
/// so the cyclic loop can call it every cycle.
#[derive(Debug)]
pub struct RateTracker {
    window: Duration,
    counter: u64,
    rate_bps: u64,
    last_sample: Option<Instant>,
}

impl RateTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            counter: 0,
            rate_bps: 0,
            last_sample: None,
        }
    }

    /// Add transferred octets to the running counter.
    pub fn record(&mut self, bytes: usize) {
        self.counter = self.counter.saturating_add(bytes as u64);
    }

    /// Recompute the rate if a full window has elapsed.
    pub fn sample(&mut self, now: Instant) {
        let last = match self.last_sample {
            Some(last) => last,
            None => {
                self.last_sample = Some(now);
                return;
            }
        };
        let elapsed = now.saturating_duration_since(last);
        if elapsed < self.window {
            return;
        }
        let secs = elapsed.as_secs_f64();
        self.rate_bps = ((self.counter.saturating_mul(8)) as f64 / secs).round() as u64;
        self.counter = 0;
        self.last_sample = Some(now);
    }

    /// Rate computed at the most recent completed window, in bit/s.
    pub fn rate_bps(&self) -> u64 {
        self.rate_bps
    }
}
