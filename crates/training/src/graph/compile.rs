//! Compile-record operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use lyra_common::{Klass, Method, Symbol};
use rustc_hash::FxHashMap;

use super::{
    CompileTrainingData, GraphInner, RecordId, TIER_SLOTS, TrainingGraph, TrainingRecord,
};
use crate::key::TrainingKey;
use crate::task::CompileTask;

/// Key of a memoized pure JIT query: query name plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoKey {
    pub name: Symbol,
    pub args: Vec<u64>,
}

/// Count the unresolved init-dependencies of a compile record: entries
/// whose class record has a live holder that is not yet initialized (or,
/// with `count_initialized`, every live-holder entry).
pub(crate) fn compute_init_deps_left_locked(
    inner: &GraphInner,
    ctd: RecordId,
    count_initialized: bool,
) -> u32 {
    let Some(compile) = inner.compile(ctd) else {
        return 0;
    };
    let mut left = 0u32;
    for &kid in &compile.init_deps {
        let Some(ktd) = inner.klass(kid) else {
            continue;
        };
        let Some(holder) = ktd.holder.as_ref() else {
            continue;
        };
        if count_initialized || !holder.klass().is_initialized() {
            left = left.saturating_add(1);
        }
    }
    left
}

impl TrainingGraph {
    /// Record a new compilation for a task's method.
    ///
    /// The whole find-or-create-and-link sequence — method record, level
    /// observation, compile-record allocation, splice into the method's
    /// compile list, and the `last_toplevel_compile` slot update — runs
    /// under one registry lock acquisition. A compile with a larger
    /// compile-id supersedes the slot's previous occupant and clears that
    /// record's init-dependencies on both sides.
    ///
    /// Returns `None` while a snapshot is in progress or if the method's
    /// holder is gone.
    pub fn compile_make(&self, task: &CompileTask) -> Option<RecordId> {
        let method = Arc::clone(task.method());
        let facts =
            TrainingKey::of_method(&method).and_then(|key| self.archived_method_facts(&key));

        let mut inner = self.write();
        if inner.snapshot {
            self.metrics
                .snapshot_rejections
                .fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let mid = Self::method_make_locked(&mut inner, &self.metrics, &method, facts)?;
        Self::notice_compilation_locked(&mut inner, mid, task.level(), false);

        let cid = Self::install_locked(
            &mut inner,
            &self.metrics,
            TrainingRecord::Compile(CompileTrainingData {
                method: mid,
                level: task.level(),
                compile_id: task.compile_id(),
                code_size: None,
                queued_ms: 0,
                started_ms: 0,
                ended_ms: 0,
                init_deps: Vec::new(),
                init_deps_left: AtomicU32::new(0),
                memo: FxHashMap::default(),
            }),
        )?;
        if let Some(mtd) = inner.method_mut(mid) {
            mtd.compiles.push(cid);
        }

        let level = task.level() as usize;
        if (1..TIER_SLOTS).contains(&level) {
            let prev = inner.method(mid).and_then(|m| m.last_toplevel[level]);
            let supersedes = match prev {
                None => true,
                Some(prev_id) => inner
                    .compile(prev_id)
                    .is_some_and(|c| task.compile_id() > c.compile_id),
            };
            if supersedes {
                if let Some(prev_id) = prev {
                    Self::clear_init_deps_locked(&mut inner, prev_id);
                }
                if let Some(mtd) = inner.method_mut(mid) {
                    mtd.last_toplevel[level] = Some(cid);
                }
            }
        }

        self.metrics
            .compilations_recorded
            .fetch_add(1, Ordering::Relaxed);
        drop(inner);

        task.attach_training(cid);
        Some(cid)
    }

    /// Record that a compilation observed a class whose initialization
    /// state it depends on.
    ///
    /// Classes that have not begun initialization are not dependencies and
    /// are ignored. The edge is bidirectional and idempotent; the
    /// unresolved counter is bumped only when the class is not yet fully
    /// initialized. Returns the class record, or `None` when nothing was
    /// recorded.
    pub fn notice_jit_observation(&self, ctd: RecordId, klass: &Arc<Klass>) -> Option<RecordId> {
        let mut inner = self.write();
        if !klass.init_state().has_begun_initialization() {
            return None;
        }
        inner.compile(ctd)?;
        let kid = Self::klass_make_locked(&mut inner, &self.metrics, klass)?;

        let already = inner
            .compile(ctd)
            .is_some_and(|c| c.init_deps.contains(&kid));
        if !already {
            if let Some(compile) = inner.compile_mut(ctd) {
                compile.init_deps.push(kid);
            }
            if let Some(ktd) = inner.klass_mut(kid) {
                ktd.comp_deps.push(ctd);
            }
            if !klass.is_initialized()
                && let Some(compile) = inner.compile(ctd)
            {
                compile.init_deps_left.fetch_add(1, Ordering::AcqRel);
            }
        }
        Some(kid)
    }

    /// Record a method inlined into this compilation.
    pub fn notice_inlined_method(&self, ctd: RecordId, method: &Arc<Method>) -> Option<RecordId> {
        let level = self.compile_level(ctd)?;
        let mid = self.method_make(method)?;
        self.notice_compilation(mid, level, true);
        self.metrics.inlines_recorded.fetch_add(1, Ordering::Relaxed);
        Some(mid)
    }

    /// Remove every init-dependency edge of a compile record, on both
    /// sides, and zero its counter. Used when a newer top-level compile
    /// takes over the dependency accounting.
    pub(crate) fn clear_init_deps_locked(inner: &mut GraphInner, ctd: RecordId) {
        let deps = match inner.compile_mut(ctd) {
            Some(compile) => std::mem::take(&mut compile.init_deps),
            None => return,
        };
        for kid in deps {
            if let Some(ktd) = inner.klass_mut(kid)
                && let Some(pos) = ktd.comp_deps.iter().position(|c| *c == ctd)
            {
                ktd.comp_deps.swap_remove(pos);
            }
        }
        if let Some(compile) = inner.compile(ctd) {
            compile.init_deps_left.store(0, Ordering::Release);
        }
    }

    /// Classes this compilation depends on.
    pub fn init_deps(&self, ctd: RecordId) -> Vec<RecordId> {
        self.read()
            .compile(ctd)
            .map(|c| c.init_deps.clone())
            .unwrap_or_default()
    }

    /// Current unresolved init-dependency count.
    pub fn init_deps_left(&self, ctd: RecordId) -> u32 {
        self.read()
            .compile(ctd)
            .map(|c| c.init_deps_left.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Recount unresolved init-dependencies from the live class states.
    /// Used for verification and after an archive restore.
    pub fn compute_init_deps_left(&self, ctd: RecordId, count_initialized: bool) -> u32 {
        compute_init_deps_left_locked(&self.read(), ctd, count_initialized)
    }

    pub fn compile_level(&self, ctd: RecordId) -> Option<u8> {
        self.read().compile(ctd).map(|c| c.level)
    }

    pub fn compile_id_of(&self, ctd: RecordId) -> Option<u64> {
        self.read().compile(ctd).map(|c| c.compile_id)
    }

    /// The owning method record.
    pub fn compile_method_of(&self, ctd: RecordId) -> Option<RecordId> {
        self.read().compile(ctd).map(|c| c.method)
    }

    pub fn compile_code_size(&self, ctd: RecordId) -> Option<u32> {
        self.read().compile(ctd).and_then(|c| c.code_size)
    }

    /// `(queued, started, ended)` wall times in milliseconds; zero = unset.
    pub fn compile_times(&self, ctd: RecordId) -> Option<(u64, u64, u64)> {
        self.read()
            .compile(ctd)
            .map(|c| (c.queued_ms, c.started_ms, c.ended_ms))
    }

    pub fn notice_task_queued(&self, ctd: RecordId, now_ms: u64) {
        let mut inner = self.write();
        if let Some(compile) = inner.compile_mut(ctd) {
            compile.queued_ms = now_ms;
        }
    }

    pub fn notice_task_started(&self, ctd: RecordId, now_ms: u64) {
        let mut inner = self.write();
        if let Some(compile) = inner.compile_mut(ctd) {
            compile.started_ms = now_ms.max(compile.queued_ms);
        }
    }

    pub fn notice_task_ended(&self, ctd: RecordId, now_ms: u64, code_size: Option<u32>) {
        let mut inner = self.write();
        if let Some(compile) = inner.compile_mut(ctd) {
            compile.ended_ms = now_ms.max(compile.started_ms);
            if code_size.is_some() {
                compile.code_size = code_size;
            }
        }
    }

    /// Memoize a pure JIT query on this compile record. The closure runs
    /// at most once per distinct `(name, args)`; it must be cheap, since
    /// it executes under the registry lock.
    pub fn compile_memoize(
        &self,
        ctd: RecordId,
        name: &Symbol,
        args: &[u64],
        compute: impl FnOnce() -> i64,
    ) -> Option<i64> {
        let mut inner = self.write();
        let compile = inner.compile_mut(ctd)?;
        let key = MemoKey {
            name: name.clone(),
            args: args.to_vec(),
        };
        if let Some(value) = compile.memo.get(&key) {
            return Some(*value);
        }
        let value = compute();
        compile.memo.insert(key, value);
        Some(value)
    }
}
