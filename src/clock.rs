//! Time source shared by every timed loop.
//!
//! Loops never call `Instant::now` or `thread::sleep` directly; they go through
//! an injected [`Clock`] so tests can drive them with simulated time.

use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Monotonic time elapsed since the clock's origin.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Simulated clock. `sleep` returns immediately after moving time forward.
///
/// With a non-zero `auto_advance`, every `now()` call also moves time forward,
/// which lets spinning loops (fades) progress without real waiting.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
    auto_advance: Duration,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_advance(auto_advance: Duration) -> Self {
        Self {
            now: Mutex::new(Duration::ZERO),
            auto_advance,
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += duration;
    }

    /// Current time without triggering auto-advance.
    pub fn peek(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = *now;
        *now += self.auto_advance;
        current
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_sleep_moves_time_forward() {
        let clock = ManualClock::new();
        clock.sleep(Duration::from_millis(250));
        clock.sleep(Duration::from_millis(1500));

        assert_eq!(clock.now(), Duration::from_millis(1750));
        assert_eq!(clock.now(), Duration::from_millis(1750));
    }

    #[test]
    fn auto_advance_applies_after_each_read() {
        let clock = ManualClock::with_auto_advance(Duration::from_millis(10));

        assert_eq!(clock.now(), Duration::ZERO);
        assert_eq!(clock.now(), Duration::from_millis(10));
        assert_eq!(clock.peek(), Duration::from_millis(20));
    }
}
