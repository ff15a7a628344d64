//! Shared test helpers: a recording stub broker and canned archives.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use lyra_common::{CompiledCodeInfo, InitState, Method, Runtime};
use lyra_training::archive::{MethodProfiler, RestoredTrainingData, SampledMethod, TrainingDump};
use lyra_training::task::DirectiveSet;
use lyra_training::{
    ActiveTasks, CompileReason, CompileTask, TrainingConfig, TrainingGraph,
};

use crate::broker::CompilerBroker;

pub(crate) struct StubProfiler(pub Vec<SampledMethod>);

impl MethodProfiler for StubProfiler {
    fn sampled_nmethods(&self) -> Vec<SampledMethod> {
        self.0.clone()
    }
}

/// Broker that records enqueues and hands the tasks back to the test.
pub(crate) struct TestBroker {
    active: Arc<ActiveTasks>,
    next_id: AtomicU64,
    refuse: AtomicBool,
    enqueued: Mutex<Vec<(String, u8)>>,
    tasks: Mutex<Vec<Arc<CompileTask>>>,
}

impl TestBroker {
    pub(crate) fn new() -> Self {
        Self {
            active: Arc::new(ActiveTasks::new()),
            next_id: AtomicU64::new(1),
            refuse: AtomicBool::new(false),
            enqueued: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn active(&self) -> &Arc<ActiveTasks> {
        &self.active
    }

    pub(crate) fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Release);
    }

    /// `(method name, level)` pairs in enqueue order.
    pub(crate) fn enqueued(&self) -> Vec<(String, u8)> {
        self.enqueued.lock().expect("lock").clone()
    }

    /// Drain the queued tasks for the test to complete.
    pub(crate) fn take_tasks(&self) -> Vec<Arc<CompileTask>> {
        std::mem::take(&mut *self.tasks.lock().expect("lock"))
    }
}

impl CompilerBroker for TestBroker {
    fn queue_size(&self, _level: u8) -> usize {
        self.tasks.lock().expect("lock").len()
    }

    fn compile_method(
        &self,
        method: &Arc<Method>,
        level: u8,
        reason: CompileReason,
        blocking: bool,
    ) -> Option<Arc<CompileTask>> {
        if self.refuse.load(Ordering::Acquire) {
            return None;
        }
        let task = CompileTask::new(
            &self.active,
            self.next_id.fetch_add(1, Ordering::Relaxed),
            Arc::clone(method),
            None,
            level,
            reason,
            0,
            None,
            blocking,
            Arc::new(DirectiveSet::default()),
            0,
        );
        self.enqueued
            .lock()
            .expect("lock")
            .push((method.name().to_string(), level));
        self.tasks.lock().expect("lock").push(Arc::clone(&task));
        Some(task)
    }
}

/// Record one compilation per method spec `(name, code level, is_aot)`,
/// derive a schedule covering them all, and return the encoded archive.
/// Classes are left fully initialized with the described code installed.
pub(crate) fn archive_bytes(runtime: &Runtime, specs: &[(&str, u8, bool)]) -> Bytes {
    let graph = TrainingGraph::new();
    let active = Arc::new(ActiveTasks::new());
    let mut sampled = Vec::new();

    for (i, (name, level, is_aot)) in specs.iter().enumerate() {
        let klass = runtime.define_class(&format!("com/app/{name}"), "app");
        klass.set_init_state(InitState::FullyInitialized);
        let method = klass.define_method(runtime.intern(name), runtime.intern("()V"));
        method.install_code(CompiledCodeInfo {
            level: *level,
            size: 128,
            is_aot: *is_aot,
        });

        let task = CompileTask::new(
            &active,
            i as u64 + 1,
            Arc::clone(&method),
            None,
            *level,
            CompileReason::Hotness,
            0,
            None,
            false,
            Arc::new(DirectiveSet::default()),
            0,
        );
        graph.compile_make(&task).expect("compile recorded");

        sampled.push(SampledMethod {
            method,
            samples: (specs.len() - i) as u64,
        });
    }

    let profiler = StubProfiler(sampled);
    TrainingDump::prepare(&graph, Some(&profiler), &TrainingConfig::default()).encode()
}

/// Archive and restore `specs` within one runtime, rehydrated and
/// initialized, ready to drive.
pub(crate) fn restored_for_driver(
    runtime: &Runtime,
    specs: &[(&str, u8, bool)],
) -> Arc<RestoredTrainingData> {
    let bytes = archive_bytes(runtime, specs);
    let restored = RestoredTrainingData::decode(&bytes, runtime).expect("decode");
    restored.restore_unshareable(runtime);
    restored.initialize();
    Arc::new(restored)
}
