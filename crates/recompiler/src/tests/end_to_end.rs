//! Full-cycle test: a recording run trains and archives, a second run
//! restores the schedule and drives every entry back to top-tier code.

use std::sync::Arc;

use lyra_common::{CompiledCodeInfo, Runtime};
use lyra_training::archive::RestoredTrainingData;
use lyra_training::{MAX_TIER, TrainingConfig};

use crate::broker::CompilerBroker;
use crate::driver::RecompilationDriver;
use crate::tests::helpers::{TestBroker, archive_bytes};
use crate::worker::CompileWorker;

fn restore_second_run(
    bytes: &[u8],
    specs: &[(&str, u8, bool)],
) -> (Runtime, Arc<RestoredTrainingData>) {
    // The second run loads the same classes; startup attaches AOT entries
    // at the recorded shapes.
    let runtime = Runtime::new();
    for (name, level, is_aot) in specs {
        let klass = runtime.define_class(&format!("com/app/{name}"), "app");
        klass.set_init_state(lyra_common::InitState::FullyInitialized);
        let method = klass.define_method(runtime.intern(name), runtime.intern("()V"));
        method.install_code(CompiledCodeInfo {
            level: *level,
            size: 128,
            is_aot: *is_aot,
        });
    }
    let restored = RestoredTrainingData::decode(bytes, &runtime).expect("decode");
    restored.restore_unshareable(&runtime);
    restored.initialize();
    (runtime, Arc::new(restored))
}

#[test]
fn test_record_archive_restore_recompile_cycle() {
    // Run 1: three methods get hot and are recorded; the archive carries
    // their schedule, most-sampled first.
    let recording = Runtime::new();
    let recorded = [
        ("render", 4u8, false),
        ("layout", 3, false),
        ("parse", 2, false),
    ];
    let bytes = archive_bytes(&recording, &recorded);

    // Run 2: the same classes start from top-tier AOT entries, which the
    // schedule exists to re-promote to JIT code.
    let aot_start = [
        ("render", MAX_TIER, true),
        ("layout", MAX_TIER, true),
        ("parse", MAX_TIER, true),
    ];
    let (_runtime2, restored) = restore_second_run(&bytes, &aot_start);
    assert!(restored.graph().verify_invariants());
    assert_eq!(restored.schedule().len(), 3);

    let config = TrainingConfig {
        delay_seconds: 0,
        load_threshold: 8.0,
        ..Default::default()
    };
    let driver = RecompilationDriver::new(config, Arc::clone(&restored), 0);
    let broker = TestBroker::new();

    // A compile worker lands each recompile: top-tier JIT code replaces
    // the AOT entry and the task lifecycle is stamped through the
    // restored graph.
    let worker = {
        let graph_owner = Arc::clone(&restored);
        CompileWorker::start(move |task| {
            task.select_for_compilation();
            task.mark_started(graph_owner.graph(), 10);
            task.method().install_code(CompiledCodeInfo {
                level: MAX_TIER,
                size: 512,
                is_aot: false,
            });
            task.mark_finished_success(graph_owner.graph(), 20, 256, 512);
        })
    };

    let mut now_ms = 0u64;
    let mut rounds = 0;
    while !driver.is_done() && rounds < 50 {
        driver.sample_load(broker.queue_size(MAX_TIER), now_ms);
        if driver.have_work(now_ms) {
            driver.recompilation_step(&broker, 2, now_ms);
        }
        for task in broker.take_tasks() {
            assert!(worker.submit(task));
        }
        // Give the worker a moment to land in-flight compiles.
        std::thread::sleep(std::time::Duration::from_millis(5));
        now_ms += 1000;
        rounds += 1;
    }
    drop(worker);

    assert!(driver.is_done(), "driver should complete within the round limit");
    assert!(driver.schedule().all_done());
    let mut enqueued: Vec<String> =
        broker.enqueued().into_iter().map(|(name, _)| name).collect();
    enqueued.sort();
    assert_eq!(enqueued, vec!["layout", "parse", "render"]);
    assert!(
        broker
            .enqueued()
            .iter()
            .all(|(_, level)| *level == MAX_TIER)
    );

    // Shutdown: every task constructed during the run has been dropped.
    broker.active().wait_for_no_active_tasks();
    assert_eq!(broker.active().count(), 0);
}

#[test]
fn test_refused_enqueues_are_absorbed_and_retried() {
    // The broker refuses the first enqueue attempt; the driver absorbs
    // the refusal, and the claimed slot is finished on a later pass once
    // the method's code lands by other means.
    let recording = Runtime::new();
    let bytes = archive_bytes(&recording, &[("render", 4, false)]);
    let (runtime2, restored) = restore_second_run(&bytes, &[("render", MAX_TIER, true)]);

    let config = TrainingConfig {
        delay_seconds: 0,
        ..Default::default()
    };
    let driver = RecompilationDriver::new(config, Arc::clone(&restored), 0);
    let broker = TestBroker::new();
    broker.set_refuse(true);

    // The slot is claimed and counted even though the enqueue was refused.
    assert_eq!(driver.recompilation_step(&broker, 4, 0), 1);
    assert!(broker.enqueued().is_empty());
    assert!(driver.schedule().is_claimed(0));
    assert!(!driver.is_done());

    // The method eventually reaches top tier anyway (say, the normal
    // tiering path); the driver retires the slot and completes.
    let name = runtime2.intern("render");
    let class_name = runtime2.intern("com/app/render");
    let loader = runtime2.intern("app");
    let klass = runtime2.find_class(&class_name, &loader).expect("class");
    let sig = runtime2.intern("()V");
    let method = klass.find_method(&name, &sig).expect("method");
    method.install_code(CompiledCodeInfo {
        level: MAX_TIER,
        size: 64,
        is_aot: false,
    });

    assert_eq!(driver.recompilation_step(&broker, 4, 0), 0);
    assert!(driver.is_done());
    assert!(driver.schedule().all_done());
}
