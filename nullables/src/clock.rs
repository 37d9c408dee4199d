//! Nullable clock. Time only moves when the test advances it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lattice_utils::Clock;

pub struct NullClock {
    base: Instant,
    offset_ms: AtomicU64,
}

impl NullClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

impl Default for NullClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for NullClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }
}
