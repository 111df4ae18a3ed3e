use crate::clock::Clock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const SLEEP_STEP: Duration = Duration::from_millis(100);

/// Cooperative cancellation token shared between a loop and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    inner: Arc<AtomicBool>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.inner.store(false, Ordering::SeqCst);
    }

    /// Sleep for `duration` in short steps, waking early once a stop is requested.
    ///
    /// Returns `true` if the sleep ended because of a stop request.
    pub fn sleep(&self, clock: &dyn Clock, duration: Duration) -> bool {
        self.sleep_in_steps(clock, duration, SLEEP_STEP)
    }

    pub fn sleep_in_steps(&self, clock: &dyn Clock, duration: Duration, step: Duration) -> bool {
        let deadline = clock.now() + duration;
        loop {
            if self.is_set() {
                return true;
            }
            let now = clock.now();
            if now >= deadline {
                return false;
            }
            clock.sleep(step.min(deadline - now));
        }
    }
}
