//! Atomic counters for training-data activity.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for monitoring recording and archive-lookup activity.
/// All counters are relaxed; they are monitoring data, not synchronization.
#[derive(Debug, Default)]
pub struct TrainingMetrics {
    /// Records installed into the registry.
    pub records_installed: AtomicU64,
    /// Install races lost to another thread (candidate dropped).
    pub install_races_lost: AtomicU64,
    /// Compilations recorded through `CompileTrainingData` creation.
    pub compilations_recorded: AtomicU64,
    /// Inlined-method observations recorded.
    pub inlines_recorded: AtomicU64,
    /// Insertions rejected because an archive snapshot was in progress.
    pub snapshot_rejections: AtomicU64,
    /// Class initialization transitions observed.
    pub init_transitions: AtomicU64,
    /// Lookups against the archived dictionary.
    pub archived_lookups: AtomicU64,
    /// Archived-dictionary lookups that returned a usable record.
    pub archived_hits: AtomicU64,
}

impl TrainingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all counters, in declaration order.
    pub fn snapshot(&self) -> (u64, u64, u64, u64, u64, u64, u64, u64) {
        (
            self.records_installed.load(Ordering::Relaxed),
            self.install_races_lost.load(Ordering::Relaxed),
            self.compilations_recorded.load(Ordering::Relaxed),
            self.inlines_recorded.load(Ordering::Relaxed),
            self.snapshot_rejections.load(Ordering::Relaxed),
            self.init_transitions.load(Ordering::Relaxed),
            self.archived_lookups.load(Ordering::Relaxed),
            self.archived_hits.load(Ordering::Relaxed),
        )
    }

    /// Reset all counters to zero. Test isolation only.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn reset(&self) {
        self.records_installed.store(0, Ordering::Relaxed);
        self.install_races_lost.store(0, Ordering::Relaxed);
        self.compilations_recorded.store(0, Ordering::Relaxed);
        self.inlines_recorded.store(0, Ordering::Relaxed);
        self.snapshot_rejections.store(0, Ordering::Relaxed);
        self.init_transitions.store(0, Ordering::Relaxed);
        self.archived_lookups.store(0, Ordering::Relaxed);
        self.archived_hits.store(0, Ordering::Relaxed);
    }
}
