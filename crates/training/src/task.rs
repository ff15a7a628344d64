//! Compile tasks and the active-task barrier.
//!
//! A [`CompileTask`] is the at-most-one-queued unit of work handed from
//! producer threads to compiler workers. Its identity is immutable; its
//! lifecycle fields are stamped as the task moves through
//! queued → started → finished. Every constructed task registers with an
//! [`ActiveTasks`] gauge and deregisters on drop, so shutdown can await
//! quiescence of all outstanding tasks.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};

use lyra_common::{ClassStrongHandle, ClassWeakHandle, CompiledCodeInfo, Method};
use tracing::debug;

use crate::graph::{RecordId, TrainingGraph};

/// Why a compilation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileReason {
    /// The method crossed a hotness threshold.
    Hotness,
    /// The recompilation driver re-promotes a scheduled method.
    MustBeCompiled,
    /// Pre-loading of archived code; bypasses the unload check.
    Preload,
}

/// Read-only compiler directives matched to a method.
#[derive(Debug, Clone)]
pub struct DirectiveSet {
    pub compile_enabled: bool,
    pub log_compilation: bool,
}

impl Default for DirectiveSet {
    fn default() -> Self {
        Self {
            compile_enabled: true,
            log_compilation: false,
        }
    }
}

/// Stack of compiler directives. The current model carries a single
/// default set; matching is by-method so the surface can grow patterns
/// without touching callers.
#[derive(Debug, Default)]
pub struct DirectivesStack {
    default: Arc<DirectiveSet>,
}

impl DirectivesStack {
    pub fn new(default: DirectiveSet) -> Self {
        Self {
            default: Arc::new(default),
        }
    }

    pub fn matching(&self, _method: &Method) -> Arc<DirectiveSet> {
        Arc::clone(&self.default)
    }
}

/// Failure text of a compile attempt: either a reference into the static
/// reason pool or an owned message built at failure time.
#[derive(Debug, Clone)]
pub enum FailureReason {
    Static(&'static str),
    Owned(String),
}

impl FailureReason {
    pub fn as_str(&self) -> &str {
        match self {
            FailureReason::Static(s) => s,
            FailureReason::Owned(s) => s,
        }
    }
}

/// Process-wide gauge of constructed-but-not-destroyed compile tasks.
///
/// The final drop of an epoch notifies waiters, giving
/// [`ActiveTasks::wait_for_no_active_tasks`] a happens-after edge over
/// every earlier task destructor.
#[derive(Debug, Default)]
pub struct ActiveTasks {
    count: Mutex<u64>,
    drained: Condvar,
}

impl ActiveTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self) {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut count = self.count.lock().unwrap();
        *count += 1;
    }

    fn deregister(&self) {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut count = self.count.lock().unwrap();
        debug_assert!(*count > 0, "active-task gauge underflow");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    /// Number of live tasks right now.
    pub fn count(&self) -> u64 {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let count = self.count.lock().unwrap();
        *count
    }

    /// Block until every outstanding task has been destroyed.
    pub fn wait_for_no_active_tasks(&self) {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
            {
                count = self.drained.wait(count).unwrap();
            }
        }
    }
}

/// Holder-class tenancy of a task: observed weakly while queued, rooted
/// strongly for the compile window, released at end of life.
#[derive(Debug)]
enum HolderTenancy {
    Weak(ClassWeakHandle),
    Strong(ClassStrongHandle),
    Released,
}

/// One compilation request.
pub struct CompileTask {
    // Immutable identity.
    compile_id: u64,
    method: Arc<Method>,
    osr_bci: Option<u32>,
    level: u8,
    reason: CompileReason,
    hotness: u32,
    aot_entry: Option<CompiledCodeInfo>,
    blocking: bool,
    directives: Arc<DirectiveSet>,

    // Lifecycle.
    created_ms: u64,
    queued_ms: AtomicU64,
    started_ms: AtomicU64,
    finished_ms: AtomicU64,
    complete: AtomicBool,
    success: AtomicBool,
    failure: Mutex<Option<FailureReason>>,
    code_size: AtomicU32,
    total_size: AtomicU32,
    training: OnceLock<RecordId>,
    holder: Mutex<HolderTenancy>,

    active: Arc<ActiveTasks>,
}

impl CompileTask {
    /// Construct a task and register it with the active-task gauge.
    #[expect(clippy::too_many_arguments, reason = "mirrors the request identity")]
    pub fn new(
        active: &Arc<ActiveTasks>,
        compile_id: u64,
        method: Arc<Method>,
        osr_bci: Option<u32>,
        level: u8,
        reason: CompileReason,
        hotness: u32,
        aot_entry: Option<CompiledCodeInfo>,
        blocking: bool,
        directives: Arc<DirectiveSet>,
        now_ms: u64,
    ) -> Arc<Self> {
        active.register();
        let holder = match method.holder() {
            Some(klass) => HolderTenancy::Weak(ClassWeakHandle::new(&klass)),
            None => HolderTenancy::Released,
        };
        Arc::new(Self {
            compile_id,
            method,
            osr_bci,
            level,
            reason,
            hotness,
            aot_entry,
            blocking,
            directives,
            created_ms: now_ms,
            queued_ms: AtomicU64::new(0),
            started_ms: AtomicU64::new(0),
            finished_ms: AtomicU64::new(0),
            complete: AtomicBool::new(false),
            success: AtomicBool::new(false),
            failure: Mutex::new(None),
            code_size: AtomicU32::new(0),
            total_size: AtomicU32::new(0),
            training: OnceLock::new(),
            holder: Mutex::new(holder),
            active: Arc::clone(active),
        })
    }

    pub fn compile_id(&self) -> u64 {
        self.compile_id
    }

    pub fn method(&self) -> &Arc<Method> {
        &self.method
    }

    pub fn osr_bci(&self) -> Option<u32> {
        self.osr_bci
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn reason(&self) -> CompileReason {
        self.reason
    }

    pub fn hotness(&self) -> u32 {
        self.hotness
    }

    pub fn aot_entry(&self) -> Option<CompiledCodeInfo> {
        self.aot_entry
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub fn directives(&self) -> &Arc<DirectiveSet> {
        &self.directives
    }

    pub fn created_ms(&self) -> u64 {
        self.created_ms
    }

    pub fn queued_ms(&self) -> u64 {
        self.queued_ms.load(Ordering::Acquire)
    }

    pub fn started_ms(&self) -> u64 {
        self.started_ms.load(Ordering::Acquire)
    }

    pub fn finished_ms(&self) -> u64 {
        self.finished_ms.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn is_success(&self) -> bool {
        self.success.load(Ordering::Acquire)
    }

    pub fn code_sizes(&self) -> (u32, u32) {
        (
            self.code_size.load(Ordering::Acquire),
            self.total_size.load(Ordering::Acquire),
        )
    }

    /// The compile record accounting for this task, once attached.
    pub fn training(&self) -> Option<RecordId> {
        self.training.get().copied()
    }

    pub(crate) fn attach_training(&self, id: RecordId) {
        let _ = self.training.set(id);
    }

    /// Select the task for compilation: upgrade the holder observation to
    /// a root for the compile window. Returns `false` if the holder class
    /// was unloaded; preload tasks bypass the check.
    pub fn select_for_compilation(&self) -> bool {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut holder = self.holder.lock().unwrap();
        match &*holder {
            HolderTenancy::Weak(weak) => match weak.upgrade() {
                Some(strong) => {
                    *holder = HolderTenancy::Strong(strong);
                    true
                }
                None => self.reason == CompileReason::Preload,
            },
            HolderTenancy::Strong(_) => true,
            HolderTenancy::Released => self.reason == CompileReason::Preload,
        }
    }

    /// Whether the holder class is gone (preload tasks are never
    /// considered unloaded).
    pub fn is_unloaded(&self) -> bool {
        if self.reason == CompileReason::Preload {
            return false;
        }
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let holder = self.holder.lock().unwrap();
        match &*holder {
            HolderTenancy::Weak(weak) => weak.is_cleared(),
            HolderTenancy::Strong(_) => false,
            HolderTenancy::Released => true,
        }
    }

    /// Retain the method against class redefinition during compilation.
    pub fn mark_on_stack(&self) {
        if !self.is_unloaded() {
            self.method.set_on_stack(true);
        }
    }

    /// Stamp queue time on the task and its compile record.
    pub fn mark_queued(&self, graph: &TrainingGraph, now_ms: u64) {
        self.queued_ms.store(now_ms, Ordering::Release);
        if let Some(ctd) = self.training() {
            graph.notice_task_queued(ctd, now_ms);
        }
    }

    /// Stamp start time on the task and its compile record.
    pub fn mark_started(&self, graph: &TrainingGraph, now_ms: u64) {
        let queued = self.queued_ms();
        self.started_ms.store(now_ms.max(queued), Ordering::Release);
        if let Some(ctd) = self.training() {
            graph.notice_task_started(ctd, now_ms);
        }
    }

    /// Finish successfully: stamp times and native-code sizes.
    pub fn mark_finished_success(
        &self,
        graph: &TrainingGraph,
        now_ms: u64,
        code_size: u32,
        total_size: u32,
    ) {
        let started = self.started_ms();
        self.finished_ms
            .store(now_ms.max(started), Ordering::Release);
        self.code_size.store(code_size, Ordering::Release);
        self.total_size.store(total_size, Ordering::Release);
        self.success.store(true, Ordering::Release);
        self.complete.store(true, Ordering::Release);
        if let Some(ctd) = self.training() {
            graph.notice_task_ended(ctd, now_ms, Some(total_size));
        }
    }

    /// Finish unsuccessfully. Non-blocking failures are parked on the
    /// method for the enqueuing site to absorb later.
    pub fn mark_finished_failure(
        &self,
        graph: &TrainingGraph,
        now_ms: u64,
        reason: FailureReason,
    ) {
        let started = self.started_ms();
        self.finished_ms
            .store(now_ms.max(started), Ordering::Release);
        self.success.store(false, Ordering::Release);
        self.complete.store(true, Ordering::Release);
        if !self.blocking {
            self.method
                .set_pending_compile_failure(reason.as_str().to_string());
        }
        debug!(
            compile_id = self.compile_id,
            reason = reason.as_str(),
            "compile task failed"
        );
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut failure = self.failure.lock().unwrap();
        *failure = Some(reason);
        if let Some(ctd) = self.training() {
            graph.notice_task_ended(ctd, now_ms, None);
        }
    }

    pub fn failure_reason(&self) -> Option<String> {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let failure = self.failure.lock().unwrap();
        failure.as_ref().map(|r| r.as_str().to_string())
    }
}

impl Drop for CompileTask {
    fn drop(&mut self) {
        // Release whichever holder handle is still held, then leave the
        // active-task epoch; the final drop wakes barrier waiters.
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        {
            *self.holder.lock().unwrap() = HolderTenancy::Released;
        }
        self.active.deregister();
    }
}

impl fmt::Debug for CompileTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileTask")
            .field("compile_id", &self.compile_id)
            .field("level", &self.level)
            .field("reason", &self.reason)
            .field("osr_bci", &self.osr_bci)
            .field("complete", &self.is_complete())
            .field("success", &self.is_success())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyra_common::Runtime;
    use std::thread;
    use std::time::Duration;

    fn make_task(
        active: &Arc<ActiveTasks>,
        runtime: &Runtime,
        name: &str,
        reason: CompileReason,
    ) -> Arc<CompileTask> {
        let klass = runtime.define_class(name, "app");
        let method = klass.define_method(runtime.intern("run"), runtime.intern("()V"));
        CompileTask::new(
            active,
            1,
            method,
            None,
            4,
            reason,
            100,
            None,
            false,
            Arc::new(DirectiveSet::default()),
            0,
        )
    }

    #[test]
    fn test_active_task_gauge() {
        let active = Arc::new(ActiveTasks::new());
        let runtime = Runtime::new();

        let t1 = make_task(&active, &runtime, "A", CompileReason::Hotness);
        let t2 = make_task(&active, &runtime, "B", CompileReason::Hotness);
        assert_eq!(active.count(), 2);

        drop(t1);
        assert_eq!(active.count(), 1);
        drop(t2);
        assert_eq!(active.count(), 0);
    }

    #[test]
    fn test_barrier_wakes_after_concurrent_destruction() {
        // Three tasks, two destroyer threads, one waiter: the waiter must
        // return only after every destructor ran, without deadlocking.
        let active = Arc::new(ActiveTasks::new());
        let runtime = Runtime::new();

        let t1 = make_task(&active, &runtime, "A", CompileReason::Hotness);
        let t2 = make_task(&active, &runtime, "B", CompileReason::Hotness);
        let t3 = make_task(&active, &runtime, "C", CompileReason::Hotness);
        assert_eq!(active.count(), 3);

        let waiter = {
            let active = Arc::clone(&active);
            thread::spawn(move || {
                active.wait_for_no_active_tasks();
                active.count()
            })
        };

        let d1 = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            drop(t1);
        });
        let d2 = thread::spawn(move || {
            drop(t2);
            thread::sleep(Duration::from_millis(5));
            drop(t3);
        });

        d1.join().expect("destroyer 1");
        d2.join().expect("destroyer 2");
        let observed = waiter.join().expect("waiter");
        assert_eq!(observed, 0);
        assert_eq!(active.count(), 0);
    }

    #[test]
    fn test_wait_returns_immediately_when_idle() {
        let active = ActiveTasks::new();
        active.wait_for_no_active_tasks();
        assert_eq!(active.count(), 0);
    }

    #[test]
    fn test_select_for_compilation_upgrades_holder() {
        let active = Arc::new(ActiveTasks::new());
        let runtime = Runtime::new();
        let task = make_task(&active, &runtime, "A", CompileReason::Hotness);

        assert!(!task.is_unloaded());
        assert!(task.select_for_compilation());
        // Selecting twice is harmless.
        assert!(task.select_for_compilation());
    }

    #[test]
    fn test_unloaded_task_is_not_selected() {
        let active = Arc::new(ActiveTasks::new());
        let syms = lyra_common::SymbolTable::new();
        let klass = lyra_common::Klass::new(syms.intern("A"), syms.intern("app"));
        let method = klass.define_method(syms.intern("run"), syms.intern("()V"));
        let task = CompileTask::new(
            &active,
            1,
            method,
            None,
            4,
            CompileReason::Hotness,
            0,
            None,
            false,
            Arc::new(DirectiveSet::default()),
            0,
        );

        drop(klass);
        assert!(task.is_unloaded());
        assert!(!task.select_for_compilation());
    }

    #[test]
    fn test_preload_bypasses_unload_check() {
        let active = Arc::new(ActiveTasks::new());
        let syms = lyra_common::SymbolTable::new();
        let klass = lyra_common::Klass::new(syms.intern("A"), syms.intern("app"));
        let method = klass.define_method(syms.intern("run"), syms.intern("()V"));
        let task = CompileTask::new(
            &active,
            1,
            method,
            None,
            4,
            CompileReason::Preload,
            0,
            None,
            false,
            Arc::new(DirectiveSet::default()),
            0,
        );

        drop(klass);
        assert!(!task.is_unloaded());
        assert!(task.select_for_compilation());
    }

    #[test]
    fn test_failure_parks_reason_on_method_for_async_tasks() {
        let active = Arc::new(ActiveTasks::new());
        let runtime = Runtime::new();
        let graph = TrainingGraph::new();
        let task = make_task(&active, &runtime, "A", CompileReason::Hotness);

        task.mark_queued(&graph, 10);
        task.mark_started(&graph, 20);
        task.mark_finished_failure(&graph, 30, FailureReason::Static("code cache full"));

        assert!(task.is_complete());
        assert!(!task.is_success());
        assert_eq!(task.failure_reason().as_deref(), Some("code cache full"));
        assert_eq!(
            task.method().take_pending_compile_failure().as_deref(),
            Some("code cache full")
        );
    }

    #[test]
    fn test_lifecycle_times_are_monotone() {
        let active = Arc::new(ActiveTasks::new());
        let runtime = Runtime::new();
        let graph = TrainingGraph::new();
        let task = make_task(&active, &runtime, "A", CompileReason::Hotness);

        task.mark_queued(&graph, 100);
        task.mark_started(&graph, 90); // stale clock reading
        task.mark_finished_success(&graph, 300, 128, 512);

        assert_eq!(task.queued_ms(), 100);
        assert_eq!(task.started_ms(), 100);
        assert_eq!(task.finished_ms(), 300);
        assert_eq!(task.code_sizes(), (128, 512));
        assert!(task.is_success());
    }

    #[test]
    fn test_mark_on_stack() {
        let active = Arc::new(ActiveTasks::new());
        let runtime = Runtime::new();
        let task = make_task(&active, &runtime, "A", CompileReason::Hotness);

        assert!(!task.method().is_on_stack());
        task.mark_on_stack();
        assert!(task.method().is_on_stack());
    }

    #[test]
    fn test_directives_stack_matches_default() {
        let runtime = Runtime::new();
        let klass = runtime.define_class("A", "app");
        let method = klass.define_method(runtime.intern("run"), runtime.intern("()V"));
        let stack = DirectivesStack::new(DirectiveSet {
            compile_enabled: false,
            log_compilation: true,
        });

        let matched = stack.matching(&method);
        assert!(!matched.compile_enabled);
        assert!(matched.log_compilation);
    }
}
