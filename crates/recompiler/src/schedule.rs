//! The recompilation schedule.
//!
//! An ordered, read-only list of archived method records with two parallel
//! atomic bit vectors: `done` marks slots whose methods need no further
//! work, `claim` gives at most one worker the right to enqueue a slot's
//! recompilation. Claims are CAS-acquired; status writes release, status
//! reads acquire, so a claim winner's enqueue happens-before any observer
//! of the published status.

use std::sync::atomic::{AtomicBool, Ordering};

use lyra_training::RecordId;
use lyra_training::archive::RestoredTrainingData;

/// Schedule slots over the archived method list.
#[derive(Debug)]
pub struct RecompilationSchedule {
    entries: Vec<RecordId>,
    done: Vec<AtomicBool>,
    claimed: Vec<AtomicBool>,
}

impl RecompilationSchedule {
    /// Allocate status storage for an ordered method list.
    pub fn new(entries: Vec<RecordId>) -> Self {
        let len = entries.len();
        Self {
            entries,
            done: (0..len).map(|_| AtomicBool::new(false)).collect(),
            claimed: (0..len).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Build the schedule from a restored archive.
    pub fn from_archive(archive: &RestoredTrainingData) -> Self {
        Self::new(archive.schedule().to_vec())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> Option<RecordId> {
        self.entries.get(index).copied()
    }

    /// Claim a slot for this worker. At most one claim ever succeeds;
    /// winners must eventually publish `done`.
    pub fn claim(&self, index: usize) -> bool {
        let Some(flag) = self.claimed.get(index) else {
            return false;
        };
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_claimed(&self, index: usize) -> bool {
        self.claimed
            .get(index)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    pub fn status_at(&self, index: usize) -> bool {
        self.done
            .get(index)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    pub fn set_status_at(&self, index: usize) {
        if let Some(flag) = self.done.get(index) {
            flag.store(true, Ordering::Release);
        }
    }

    /// Whether every slot has published `done`.
    pub fn all_done(&self) -> bool {
        self.done.iter().all(|flag| flag.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Slot logic never dereferences entries, but they must be real
    /// record ids; mint them from a scratch registry.
    fn ids(count: usize) -> Vec<RecordId> {
        let runtime = lyra_common::Runtime::new();
        let graph = lyra_training::TrainingGraph::new();
        (0..count)
            .map(|i| {
                graph
                    .klass_make(&runtime.define_class(&format!("K{i}"), "app"))
                    .expect("record")
            })
            .collect()
    }

    #[test]
    fn test_claim_succeeds_once() {
        let schedule = RecompilationSchedule::new(ids(2));
        assert!(!schedule.is_claimed(0));
        assert!(schedule.claim(0));
        assert!(schedule.is_claimed(0));
        assert!(!schedule.claim(0));
        // Other slots are unaffected.
        assert!(schedule.claim(1));
    }

    #[test]
    fn test_status_starts_pending() {
        let schedule = RecompilationSchedule::new(ids(3));
        assert!(!schedule.status_at(1));
        assert!(!schedule.all_done());

        schedule.set_status_at(1);
        assert!(schedule.status_at(1));
        assert!(!schedule.all_done());

        schedule.set_status_at(0);
        schedule.set_status_at(2);
        assert!(schedule.all_done());
    }

    #[test]
    fn test_out_of_range_slots_are_inert() {
        let schedule = RecompilationSchedule::new(Vec::new());
        assert!(schedule.is_empty());
        assert!(schedule.entry(0).is_none());
        assert!(!schedule.claim(0));
        assert!(!schedule.status_at(0));
        schedule.set_status_at(0);
        assert!(schedule.all_done());
    }
}
