//! Monotonic millisecond clock.

use std::time::Instant;

/// Monotonic clock with a fixed epoch, reporting milliseconds since
/// construction. Used for load-average sampling and lifecycle timestamps;
/// never goes backwards.
#[derive(Debug)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the clock was created.
    pub fn now_millis(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
