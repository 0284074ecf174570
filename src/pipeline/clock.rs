//! Scheduler time base
//!
//! All pipeline time is UTC epoch seconds as `f64`, the unit used by the
//! wire format. Replays and tests inject their own clock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of "now" for buffering, event expiry and replay release
pub trait Clock: Send + Sync {
    /// Current time (UTC epoch seconds)
    fn now(&self) -> f64;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 * 1.0e-6
    }
}

/// Replay time: starts at `start` and runs at `speed` × tokio time.
///
/// Driven by `tokio::time::Instant`, so a paused tokio runtime makes the
/// replay fully deterministic.
#[derive(Debug, Clone, Copy)]
pub struct ReplayClock {
    start: f64,
    speed: f64,
    origin: tokio::time::Instant,
}

impl ReplayClock {
    pub fn new(start: f64, speed: f64) -> Self {
        Self { start, speed, origin: tokio::time::Instant::now() }
    }
}

impl Clock for ReplayClock {
    fn now(&self) -> f64 {
        self.start + self.origin.elapsed().as_secs_f64() * self.speed
    }
}

/// Clock moved explicitly by the caller
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(now: f64) -> Self {
        Self { bits: AtomicU64::new(now.to_bits()) }
    }

    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
