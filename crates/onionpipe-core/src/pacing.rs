//! Request pacing: politeness delay, retry backoff, and the clock behind them
//!
//! All waiting in the pipeline goes through a [`Clock`] so tests can swap in
//! [`ManualClock`], which records requested sleeps instead of blocking.

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source of blocking sleeps
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeping
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Clock that never blocks and records every sleep it was asked for
#[derive(Debug, Default)]
pub struct ManualClock {
    slept: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// All sleeps requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Clock for ManualClock {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
    }
}

pub type SharedClock = Arc<dyn Clock>;

/// Rate-limiting policy: fixed delay between pages and linear retry backoff.
#[derive(Clone)]
pub struct Pacing {
    clock: SharedClock,
    /// Pause between consecutive pages / targets
    pub politeness: Duration,
    /// Backoff unit; attempt `i` waits `i * backoff_base`
    pub backoff_base: Duration,
}

impl std::fmt::Debug for Pacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacing")
            .field("politeness", &self.politeness)
            .field("backoff_base", &self.backoff_base)
            .finish_non_exhaustive()
    }
}

impl Pacing {
    pub fn new(clock: SharedClock, politeness: Duration, backoff_base: Duration) -> Self {
        Self {
            clock,
            politeness,
            backoff_base,
        }
    }

    /// Real-time pacing with the given delays
    pub fn system(politeness: Duration, backoff_base: Duration) -> Self {
        Self::new(Arc::new(SystemClock), politeness, backoff_base)
    }

    /// Backoff after failed attempt `attempt` (1-based): `attempt * base`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }

    pub fn wait_backoff(&self, attempt: u32) {
        self.clock.sleep(self.backoff(attempt));
    }

    pub fn wait_politeness(&self) {
        self.clock.sleep(self.politeness);
    }

    /// Arbitrary wait through the same clock (e.g. circuit stabilization)
    pub fn wait(&self, duration: Duration) {
        self.clock.sleep(duration);
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_linear() {
        let pacing = Pacing::new(
            Arc::new(ManualClock::new()),
            Duration::from_secs(1),
            Duration::from_secs(3),
        );
        assert_eq!(pacing.backoff(1), Duration::from_secs(3));
        assert_eq!(pacing.backoff(2), Duration::from_secs(6));
        assert_eq!(pacing.backoff(3), Duration::from_secs(9));
    }

    #[test]
    fn manual_clock_records_without_blocking() {
        let clock = Arc::new(ManualClock::new());
        let pacing = Pacing::new(clock.clone(), Duration::from_secs(60), Duration::from_secs(30));
        pacing.wait_politeness();
        pacing.wait_backoff(2);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(60), Duration::from_secs(60)]
        );
        assert_eq!(clock.total(), Duration::from_secs(120));
    }
}
