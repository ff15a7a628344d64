//! The recompilation driver.
//!
//! Walks the restored schedule in index order, re-promoting each method
//! to top-tier code once its class is initialized and its current code
//! makes it eligible: a top-tier AOT entry is always eligible, anything
//! below top tier only under forced recompilation. Slots that cannot
//! progress yet are revisited on a later step; a method that already
//! carries top-tier JIT code (including one the driver recompiled
//! earlier) retires its slot. When a full scan finds neither work nor a
//! revisit, the driver publishes global completion.
//!
//! The driver never blocks and owns no thread; the embedder paces it by
//! calling [`RecompilationDriver::have_work`] and
//! [`RecompilationDriver::recompilation_step`] periodically and feeds the
//! load gate through [`RecompilationDriver::sample_load`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lyra_training::archive::RestoredTrainingData;
use lyra_training::{CompileReason, MAX_TIER, TrainingConfig};
use tracing::{debug, info};

use crate::broker::CompilerBroker;
use crate::load::LoadAverage;
use crate::schedule::RecompilationSchedule;

/// Load-gated driver over a restored recompilation schedule.
#[derive(Debug)]
pub struct RecompilationDriver {
    config: TrainingConfig,
    archived: Arc<RestoredTrainingData>,
    schedule: RecompilationSchedule,
    load: LoadAverage,
    done: AtomicBool,
    started_at_ms: u64,
}

impl RecompilationDriver {
    pub fn new(config: TrainingConfig, archived: Arc<RestoredTrainingData>, now_ms: u64) -> Self {
        let schedule = RecompilationSchedule::from_archive(&archived);
        let load = LoadAverage::with_capacity(config.load_samples);
        Self {
            config,
            archived,
            schedule,
            load,
            done: AtomicBool::new(false),
            started_at_ms: now_ms,
        }
    }

    pub fn schedule(&self) -> &RecompilationSchedule {
        &self.schedule
    }

    /// Record the compile-queue length; the broker calls this
    /// periodically.
    pub fn sample_load(&self, queue_size: usize, now_ms: u64) {
        self.load
            .sample(u64::try_from(queue_size).unwrap_or(u64::MAX), now_ms);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Admission control: whether a recompilation step should run now.
    pub fn have_work(&self, now_ms: u64) -> bool {
        if !self.config.enable_recompilation
            || self.schedule.is_empty()
            || self.is_done()
        {
            return false;
        }
        let delay_ms = self.config.delay_seconds.saturating_mul(1000);
        if now_ms.saturating_sub(self.started_at_ms) < delay_ms {
            return false;
        }
        self.load.value(now_ms) <= self.config.load_threshold
    }

    /// Run one driver step, enqueuing at most `step` recompilations.
    /// Returns the number of compilations enqueued.
    ///
    /// Never blocks. If a full scan produces no work and leaves nothing
    /// to revisit, global completion is published with a release store.
    pub fn recompilation_step(
        &self,
        broker: &dyn CompilerBroker,
        step: usize,
        _now_ms: u64,
    ) -> usize {
        if self.is_done() {
            return 0;
        }

        let graph = self.archived.graph();
        let mut count = 0usize;
        let mut repeat = false;
        let mut scanned_all = true;

        for slot in 0..self.schedule.len() {
            if count >= step {
                scanned_all = false;
                break;
            }
            if self.schedule.status_at(slot) {
                continue;
            }
            let Some(mtd) = self.schedule.entry(slot) else {
                continue;
            };

            // Symbolic entries — no live method or no live holder class —
            // are retired immediately.
            let Some(method) = graph.method_holder(mtd) else {
                debug!(slot, "retiring symbolic schedule entry");
                self.schedule.set_status_at(slot);
                continue;
            };
            let Some(holder) = method.holder() else {
                debug!(slot, "retiring entry for unloaded class");
                self.schedule.set_status_at(slot);
                continue;
            };

            // Not initialized yet: revisit on a later step.
            if !holder.is_initialized() {
                repeat = true;
                continue;
            }

            // No code attached yet: revisit.
            let Some(code) = method.installed_code() else {
                repeat = true;
                continue;
            };

            // Top-tier JIT code retires the slot, whether it tiered up
            // naturally or a recompile we enqueued earlier has landed.
            if code.level == MAX_TIER && !code.is_aot {
                self.schedule.set_status_at(slot);
                continue;
            }

            // Claimed but not done: a recompile is in flight.
            if self.schedule.is_claimed(slot) {
                repeat = true;
                continue;
            }

            // Eligibility: top-tier AOT entries are always re-promoted;
            // anything else only under forced recompilation.
            let top_aot = code.is_aot && code.level == MAX_TIER;
            if !self.config.force_recompilation && !top_aot {
                repeat = true;
                continue;
            }

            if !self.schedule.claim(slot) {
                continue;
            }

            if !method.has_profile() {
                method.ensure_profile();
            }

            let task =
                broker.compile_method(&method, MAX_TIER, CompileReason::MustBeCompiled, false);
            if task.is_none() {
                debug!(slot, method = %method.name(), "recompile enqueue refused");
            }
            // Absorb any pending asynchronous failure at the enqueue site.
            if let Some(failure) = method.take_pending_compile_failure() {
                debug!(slot, %failure, "absorbed pending compile failure");
            }

            count += 1;
        }

        if scanned_all && count == 0 && !repeat && !self.schedule.is_empty() {
            self.done.store(true, Ordering::Release);
            info!(slots = self.schedule.len(), "recompilation schedule complete");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::helpers::{TestBroker, restored_for_driver};
    use lyra_common::{CompiledCodeInfo, Runtime};

    const SECOND: u64 = 1000;

    fn driver_config() -> TrainingConfig {
        TrainingConfig {
            delay_seconds: 0,
            force_recompilation: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_load_gating_follows_queue_pressure() {
        // Sustained queue length 40 against a threshold of 35 gates the
        // driver off; once fresh samples show the queue at 10, work is
        // admitted again.
        let runtime = Runtime::new();
        let archived = restored_for_driver(&runtime, &[("m1", 4, false)]);
        let config = TrainingConfig {
            load_threshold: 35.0,
            ..driver_config()
        };
        let driver = RecompilationDriver::new(config, archived, 0);

        driver.sample_load(40, 0);
        driver.sample_load(40, SECOND);
        driver.sample_load(40, 2 * SECOND);
        assert!(!driver.have_work(2 * SECOND));

        driver.sample_load(10, 10 * SECOND);
        driver.sample_load(10, 11 * SECOND);
        driver.sample_load(10, 12 * SECOND);
        assert!(driver.have_work(12 * SECOND));
    }

    #[test]
    fn test_single_step_recompiles_one_method() {
        // m1 already carries top-tier code; m2 sits at tier 1. One step
        // retires m1's slot and enqueues exactly one recompile for m2.
        let runtime = Runtime::new();
        let archived = restored_for_driver(&runtime, &[("m1", 4, false), ("m2", 1, false)]);
        let driver = RecompilationDriver::new(driver_config(), archived, 0);
        let broker = TestBroker::new();

        let count = driver.recompilation_step(&broker, 1, 0);

        assert_eq!(count, 1);
        assert_eq!(broker.enqueued(), vec![("m2".to_string(), MAX_TIER)]);
        assert!(driver.schedule().status_at(0), "m1 retired as already top-tier");
        assert!(!driver.schedule().status_at(1), "m2 pending until its compile lands");
        assert!(driver.schedule().is_claimed(1));
    }

    #[test]
    fn test_empty_schedule_never_has_work() {
        let runtime = Runtime::new();
        let archived = restored_for_driver(&runtime, &[]);
        let driver = RecompilationDriver::new(driver_config(), archived, 0);

        assert!(!driver.have_work(0));
        assert!(!driver.have_work(1000 * SECOND));
    }

    #[test]
    fn test_delay_holds_work_back() {
        let runtime = Runtime::new();
        let archived = restored_for_driver(&runtime, &[("m1", 1, false)]);
        let config = TrainingConfig {
            delay_seconds: 5,
            force_recompilation: true,
            ..Default::default()
        };
        let driver = RecompilationDriver::new(config, archived, 10 * SECOND);

        assert!(!driver.have_work(12 * SECOND));
        assert!(driver.have_work(15 * SECOND));
    }

    #[test]
    fn test_disabled_driver_never_has_work() {
        let runtime = Runtime::new();
        let archived = restored_for_driver(&runtime, &[("m1", 1, false)]);
        let config = TrainingConfig {
            enable_recompilation: false,
            delay_seconds: 0,
            ..Default::default()
        };
        let driver = RecompilationDriver::new(config, archived, 0);
        assert!(!driver.have_work(SECOND));
    }

    #[test]
    fn test_aot_top_tier_is_eligible_without_force() {
        let runtime = Runtime::new();
        let archived = restored_for_driver(&runtime, &[("m1", 4, true)]);
        let config = TrainingConfig {
            delay_seconds: 0,
            force_recompilation: false,
            ..Default::default()
        };
        let driver = RecompilationDriver::new(config, archived, 0);
        let broker = TestBroker::new();

        let count = driver.recompilation_step(&broker, 8, 0);
        assert_eq!(count, 1);
        assert_eq!(broker.enqueued(), vec![("m1".to_string(), MAX_TIER)]);
    }

    #[test]
    fn test_lower_tier_stalls_without_force() {
        // Designed stall: a tier-1 method is not recompiled and not
        // retired, so the schedule keeps waiting for natural tier-up.
        let runtime = Runtime::new();
        let archived = restored_for_driver(&runtime, &[("m1", 1, false)]);
        let config = TrainingConfig {
            delay_seconds: 0,
            force_recompilation: false,
            ..Default::default()
        };
        let driver = RecompilationDriver::new(config, archived, 0);
        let broker = TestBroker::new();

        for _ in 0..3 {
            assert_eq!(driver.recompilation_step(&broker, 4, 0), 0);
        }
        assert!(broker.enqueued().is_empty());
        assert!(!driver.is_done());
        assert!(driver.have_work(0));
    }

    #[test]
    fn test_driver_completes_when_recompiles_land() {
        let runtime = Runtime::new();
        let archived =
            restored_for_driver(&runtime, &[("m1", 4, true), ("m2", 4, true)]);
        let driver = RecompilationDriver::new(driver_config(), Arc::clone(&archived), 0);
        let broker = TestBroker::new();

        // First step enqueues both recompiles.
        assert_eq!(driver.recompilation_step(&broker, 8, 0), 2);
        assert!(!driver.is_done());

        // In-flight slots keep the driver alive but do no new work.
        assert_eq!(driver.recompilation_step(&broker, 8, 0), 0);
        assert!(!driver.is_done());

        // The compiles land: top-tier JIT code replaces the AOT entries.
        for task in broker.take_tasks() {
            task.method().install_code(CompiledCodeInfo {
                level: MAX_TIER,
                size: 256,
                is_aot: false,
            });
        }

        // The landing scan retires both slots and publishes completion.
        assert_eq!(driver.recompilation_step(&broker, 8, 0), 0);
        assert!(driver.is_done());
        assert!(driver.schedule().all_done());
        assert!(!driver.have_work(0));
        assert_eq!(driver.recompilation_step(&broker, 8, 0), 0);
    }

    #[test]
    fn test_symbolic_entries_retire_and_complete() {
        // The scheduled method's class never loads in this run: the slot
        // retires as symbolic and the driver completes.
        let recording = Runtime::new();
        let bytes = crate::tests::helpers::archive_bytes(&recording, &[("m1", 4, true)]);

        // Restore into a runtime without the recorded classes.
        let empty_runtime = Runtime::new();
        let orphaned = Arc::new(
            lyra_training::archive::RestoredTrainingData::decode(&bytes, &empty_runtime)
                .expect("decode"),
        );
        orphaned.restore_unshareable(&empty_runtime);
        orphaned.initialize();

        let driver = RecompilationDriver::new(driver_config(), orphaned, 0);
        let broker = TestBroker::new();

        assert_eq!(driver.recompilation_step(&broker, 8, 0), 0);
        assert!(driver.schedule().status_at(0));
        // Retiring a symbolic slot is neither work nor a revisit, so the
        // same scan already published completion.
        assert!(driver.is_done());
        assert!(broker.enqueued().is_empty());
    }
}
