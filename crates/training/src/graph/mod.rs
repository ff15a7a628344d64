//! Training-record registry.
//!
//! The registry owns every record in an append-only arena behind one
//! coarse `RwLock`; a key index provides insert-if-absent installation.
//! Records reference each other through stable [`RecordId`] indices —
//! forward and back edges are independent index vectors, and removal (on
//! supersede) is swap-delete under the registry lock.
//!
//! Three record variants exist:
//!
//! - [`KlassTrainingData`] — facts about one class and its dependency edges,
//! - [`MethodTrainingData`] — facts about one method and its compilations,
//! - [`CompileTrainingData`] — facts about one past compilation.
//!
//! The per-variant operations live in the `klass`, `method`, and `compile`
//! submodules; this module holds the arena, installation, the snapshot
//! flag, and the invariant verifier.

mod compile;
mod klass;
mod method;

pub use compile::MemoKey;
pub(crate) use compile::compute_init_deps_left_locked;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use lyra_common::{ClassStrongHandle, Method};
use rustc_hash::FxHashMap;

use crate::archive::restore::RestoredTrainingData;
use crate::key::TrainingKey;
use crate::metrics::TrainingMetrics;

/// Highest optimization tier a method can be compiled at.
pub const MAX_TIER: u8 = 4;

/// Slots for `last_toplevel_compile`, indexed by tier level (slot 0 unused).
pub(crate) const TIER_SLOTS: usize = MAX_TIER as usize + 1;

/// Stable handle of a record inside its registry's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u32);

impl RecordId {
    pub(crate) fn from_index(index: usize) -> Self {
        #[expect(
            clippy::expect_used,
            reason = "arena growth past u32 index space is a fatal invariant violation"
        )]
        let raw = u32::try_from(index).expect("record arena index overflow");
        Self(raw)
    }

    pub(crate) fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Variant tag of a training record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Klass,
    Method,
    Compile,
}

/// Facts about one class: the live back-reference (a strong handle that
/// roots the class while the graph is retained), classes that must
/// initialize before it, and compilations depending on its init state.
#[derive(Debug)]
pub(crate) struct KlassTrainingData {
    pub(crate) key: TrainingKey,
    pub(crate) holder: Option<ClassStrongHandle>,
    pub(crate) init_deps: Vec<RecordId>,
    pub(crate) comp_deps: Vec<RecordId>,
}

/// Facts about one method: owning class record, live back-reference, all
/// compilations (chronological; the newest is the logical head), the last
/// top-level compilation per tier, and observation flags.
#[derive(Debug)]
pub(crate) struct MethodTrainingData {
    pub(crate) key: TrainingKey,
    pub(crate) klass: RecordId,
    pub(crate) holder: Option<Arc<Method>>,
    pub(crate) compiles: Vec<RecordId>,
    pub(crate) last_toplevel: [Option<RecordId>; TIER_SLOTS],
    /// Bitmask of tier levels that ever observed this method.
    pub(crate) levels_seen: u8,
    pub(crate) was_inlined: bool,
    pub(crate) was_toplevel: bool,
}

/// Facts about one past compilation.
#[derive(Debug)]
pub(crate) struct CompileTrainingData {
    pub(crate) method: RecordId,
    pub(crate) level: u8,
    pub(crate) compile_id: u64,
    pub(crate) code_size: Option<u32>,
    pub(crate) queued_ms: u64,
    pub(crate) started_ms: u64,
    pub(crate) ended_ms: u64,
    pub(crate) init_deps: Vec<RecordId>,
    /// Unresolved entries of `init_deps`: live holder, not yet initialized.
    pub(crate) init_deps_left: AtomicU32,
    /// Memoized pure JIT queries; transient, never archived.
    pub(crate) memo: FxHashMap<MemoKey, i64>,
}

#[derive(Debug)]
pub(crate) enum TrainingRecord {
    Klass(KlassTrainingData),
    Method(MethodTrainingData),
    Compile(CompileTrainingData),
}

impl TrainingRecord {
    pub(crate) fn kind(&self) -> RecordKind {
        match self {
            TrainingRecord::Klass(_) => RecordKind::Klass,
            TrainingRecord::Method(_) => RecordKind::Method,
            TrainingRecord::Compile(_) => RecordKind::Compile,
        }
    }

    /// The record's key; compilations are unkeyed.
    pub(crate) fn key(&self) -> Option<&TrainingKey> {
        match self {
            TrainingRecord::Klass(k) => Some(&k.key),
            TrainingRecord::Method(m) => Some(&m.key),
            TrainingRecord::Compile(_) => None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct GraphInner {
    pub(crate) records: Vec<TrainingRecord>,
    pub(crate) index: FxHashMap<TrainingKey, RecordId>,
    /// While set, insertions are rejected so a dump sees a consistent graph.
    pub(crate) snapshot: bool,
}

impl GraphInner {
    pub(crate) fn record(&self, id: RecordId) -> Option<&TrainingRecord> {
        self.records.get(id.index())
    }

    pub(crate) fn klass(&self, id: RecordId) -> Option<&KlassTrainingData> {
        match self.records.get(id.index()) {
            Some(TrainingRecord::Klass(k)) => Some(k),
            _ => None,
        }
    }

    pub(crate) fn klass_mut(&mut self, id: RecordId) -> Option<&mut KlassTrainingData> {
        match self.records.get_mut(id.index()) {
            Some(TrainingRecord::Klass(k)) => Some(k),
            _ => None,
        }
    }

    pub(crate) fn method(&self, id: RecordId) -> Option<&MethodTrainingData> {
        match self.records.get(id.index()) {
            Some(TrainingRecord::Method(m)) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn method_mut(&mut self, id: RecordId) -> Option<&mut MethodTrainingData> {
        match self.records.get_mut(id.index()) {
            Some(TrainingRecord::Method(m)) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn compile(&self, id: RecordId) -> Option<&CompileTrainingData> {
        match self.records.get(id.index()) {
            Some(TrainingRecord::Compile(c)) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn compile_mut(&mut self, id: RecordId) -> Option<&mut CompileTrainingData> {
        match self.records.get_mut(id.index()) {
            Some(TrainingRecord::Compile(c)) => Some(c),
            _ => None,
        }
    }
}

/// The training-record registry: arena, key index, snapshot flag, and the
/// optional attached archive consulted by `method_make` on a miss.
#[derive(Debug, Default)]
pub struct TrainingGraph {
    inner: RwLock<GraphInner>,
    metrics: TrainingMetrics,
    archived: RwLock<Option<Arc<RestoredTrainingData>>>,
}

impl TrainingGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from restored records, re-deriving the key index.
    pub(crate) fn from_parts(records: Vec<TrainingRecord>) -> Self {
        let mut index = FxHashMap::default();
        for (i, record) in records.iter().enumerate() {
            if let Some(key) = record.key()
                && !key.is_empty()
            {
                index.insert(key.clone(), RecordId::from_index(i));
            }
        }
        Self {
            inner: RwLock::new(GraphInner {
                records,
                index,
                snapshot: false,
            }),
            metrics: TrainingMetrics::new(),
            archived: RwLock::new(None),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, GraphInner> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let inner = self.inner.read().unwrap();
        inner
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, GraphInner> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let inner = self.inner.write().unwrap();
        inner
    }

    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    /// Number of records in the arena (all variants).
    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a record by key. Lock-gated but non-blocking in practice:
    /// the registry lock is only ever held for O(1) work.
    pub fn find(&self, key: &TrainingKey) -> Option<RecordId> {
        if key.is_empty() {
            return None;
        }
        self.read().index.get(key).copied()
    }

    pub fn kind(&self, id: RecordId) -> Option<RecordKind> {
        self.read().record(id).map(TrainingRecord::kind)
    }

    /// The record's key: `Empty` for compilations, `None` for a bad id.
    pub fn key_of(&self, id: RecordId) -> Option<TrainingKey> {
        let inner = self.read();
        let record = inner.record(id)?;
        Some(record.key().cloned().unwrap_or(TrainingKey::Empty))
    }

    /// Every record id currently in the arena, for debug iteration.
    pub fn record_ids(&self) -> Vec<RecordId> {
        (0..self.read().records.len())
            .map(RecordId::from_index)
            .collect()
    }

    /// Freeze insertions so a dump observes a consistent graph. Insertions
    /// attempted while frozen return `None` and are counted.
    pub fn begin_snapshot(&self) {
        self.write().snapshot = true;
    }

    pub fn end_snapshot(&self) {
        self.write().snapshot = false;
    }

    pub fn snapshot_in_progress(&self) -> bool {
        self.read().snapshot
    }

    /// Attach restored training data; `method_make` consults it on a
    /// registry miss.
    pub fn attach_archive(&self, data: Arc<RestoredTrainingData>) {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut archived = self.archived.write().unwrap();
        *archived = Some(data);
    }

    pub fn archived(&self) -> Option<Arc<RestoredTrainingData>> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let archived = self.archived.read().unwrap();
        archived.clone()
    }

    /// Insert-if-absent under the (held) registry lock.
    ///
    /// Returns the new record's id, the pre-existing record's id for an
    /// already-installed key, or `None` while a snapshot is in progress.
    /// A keyed collision between records of different variants is a
    /// programming error and aborts.
    pub(crate) fn install_locked(
        inner: &mut GraphInner,
        metrics: &TrainingMetrics,
        record: TrainingRecord,
    ) -> Option<RecordId> {
        if inner.snapshot {
            metrics
                .snapshot_rejections
                .fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if let Some(key) = record.key()
            && !key.is_empty()
            && let Some(&existing) = inner.index.get(key)
        {
            let existing_kind = inner
                .record(existing)
                .map(TrainingRecord::kind);
            assert!(
                existing_kind == Some(record.kind()),
                "conflicting records installed under one key: {key:?}"
            );
            metrics.install_races_lost.fetch_add(1, Ordering::Relaxed);
            return Some(existing);
        }

        let id = RecordId::from_index(inner.records.len());
        if let Some(key) = record.key()
            && !key.is_empty()
        {
            inner.index.insert(key.clone(), id);
        }
        inner.records.push(record);
        metrics.records_installed.fetch_add(1, Ordering::Relaxed);
        Some(id)
    }

    /// Check edge duality, counter consistency, key uniqueness, and time
    /// monotonicity over the whole graph. Intended for tests and debugging;
    /// meaningful only at quiescence.
    pub fn verify_invariants(&self) -> bool {
        let inner = self.read();
        for (i, record) in inner.records.iter().enumerate() {
            let id = RecordId::from_index(i);
            match record {
                TrainingRecord::Klass(k) => {
                    for &cid in &k.comp_deps {
                        let Some(ctd) = inner.compile(cid) else {
                            return false;
                        };
                        if !ctd.init_deps.contains(&id) {
                            return false;
                        }
                    }
                }
                TrainingRecord::Method(m) => {
                    for &cid in &m.compiles {
                        if inner.compile(cid).is_none() {
                            return false;
                        }
                    }
                }
                TrainingRecord::Compile(c) => {
                    for &kid in &c.init_deps {
                        let Some(ktd) = inner.klass(kid) else {
                            return false;
                        };
                        if !ktd.comp_deps.contains(&id) {
                            return false;
                        }
                    }
                    let expected = compile::compute_init_deps_left_locked(&inner, id, false);
                    if c.init_deps_left.load(Ordering::Acquire) != expected {
                        return false;
                    }
                    let monotone = (c.started_ms == 0 || c.started_ms >= c.queued_ms)
                        && (c.ended_ms == 0 || c.ended_ms >= c.started_ms);
                    if !monotone {
                        return false;
                    }
                }
            }
        }
        true
    }
}
