//! Compile-queue load estimation.
//!
//! A fixed-capacity ring of `(value, timestamp)` samples. `value()` is a
//! weighted mean in which each sample's weight is the reciprocal of its
//! age in whole seconds (clamped to one), so a steady queue reads as its
//! steady length while stale samples fade out. Uninitialized slots carry a
//! negative marker and are ignored.
//!
//! Sampling is lock-free but single-producer: concurrent samplers must be
//! serialized by the caller. Readers may observe a slot mid-update; the
//! estimate tolerates that, it is pacing data, not synchronization.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

/// Default number of samples retained.
pub const LOAD_SAMPLE_CAPACITY: usize = 256;

#[derive(Debug)]
struct Slot {
    value: AtomicI64,
    stamp_ms: AtomicU64,
}

/// Time-decayed weighted moving average of non-negative samples.
#[derive(Debug)]
pub struct LoadAverage {
    slots: Box<[Slot]>,
    cursor: AtomicUsize,
}

impl LoadAverage {
    pub fn new() -> Self {
        Self::with_capacity(LOAD_SAMPLE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity.max(1))
            .map(|_| Slot {
                value: AtomicI64::new(-1),
                stamp_ms: AtomicU64::new(0),
            })
            .collect();
        Self {
            slots,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Record a sample taken at `now_ms`, overwriting the oldest slot.
    pub fn sample(&self, value: u64, now_ms: u64) {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let slot = &self.slots[index];
        slot.stamp_ms.store(now_ms, Ordering::Relaxed);
        slot.value
            .store(i64::try_from(value).unwrap_or(i64::MAX), Ordering::Relaxed);
    }

    /// Weighted mean of the initialized samples as of `now_ms`; zero when
    /// no sample has been recorded.
    pub fn value(&self, now_ms: u64) -> f64 {
        let mut weighted_sum = 0.0f64;
        let mut weight_total = 0.0f64;
        for slot in &self.slots {
            let value = slot.value.load(Ordering::Relaxed);
            if value < 0 {
                continue;
            }
            let stamp = slot.stamp_ms.load(Ordering::Relaxed);
            let age_seconds = now_ms.saturating_sub(stamp) / 1000;
            let weight = 1.0 / (age_seconds.max(1) as f64);
            weighted_sum += value as f64 * weight;
            weight_total += weight;
        }
        if weight_total == 0.0 {
            return 0.0;
        }
        weighted_sum / weight_total
    }
}

impl Default for LoadAverage {
    fn default() -> Self {
        Self::new()
    }
}
