//! Klass-record operations.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use lyra_common::{ClassStrongHandle, InitState, Klass};

use super::{GraphInner, KlassTrainingData, RecordId, TrainingGraph, TrainingRecord};
use crate::key::TrainingKey;
use crate::metrics::TrainingMetrics;

impl TrainingGraph {
    /// Find or create the klass record for a live class.
    ///
    /// Consults the class's cached record index first, then the registry.
    /// Returns `None` only while a snapshot is in progress.
    pub fn klass_make(&self, klass: &Arc<Klass>) -> Option<RecordId> {
        if let Some(cached) = klass.cached_training() {
            return Some(RecordId::from_raw(cached));
        }
        let key = TrainingKey::of_class(klass);
        if let Some(id) = self.find(&key) {
            klass.cache_training(id.raw());
            return Some(id);
        }
        let mut inner = self.write();
        Self::klass_make_locked(&mut inner, &self.metrics, klass)
    }

    /// The `null_if_not_found` variant of [`TrainingGraph::klass_make`]:
    /// never creates a record.
    pub fn klass_find(&self, klass: &Klass) -> Option<RecordId> {
        if let Some(cached) = klass.cached_training() {
            return Some(RecordId::from_raw(cached));
        }
        self.find(&TrainingKey::of_class(klass))
    }

    pub(crate) fn klass_make_locked(
        inner: &mut GraphInner,
        metrics: &TrainingMetrics,
        klass: &Arc<Klass>,
    ) -> Option<RecordId> {
        // Double-check under the lock: the cache or index may have been
        // populated since the caller's unlocked probe.
        if let Some(cached) = klass.cached_training() {
            return Some(RecordId::from_raw(cached));
        }
        let key = TrainingKey::of_class(klass);
        let id = match inner.index.get(&key) {
            Some(&existing) => existing,
            None => Self::install_locked(
                inner,
                metrics,
                TrainingRecord::Klass(KlassTrainingData {
                    key,
                    holder: Some(ClassStrongHandle::new(Arc::clone(klass))),
                    init_deps: Vec::new(),
                    comp_deps: Vec::new(),
                }),
            )?,
        };
        klass.cache_training(id.raw());
        Some(id)
    }

    /// The live class behind a klass record, if any. A record without a
    /// holder is symbolic.
    pub fn klass_holder(&self, id: RecordId) -> Option<Arc<Klass>> {
        let inner = self.read();
        inner
            .klass(id)?
            .holder
            .as_ref()
            .map(|h| Arc::clone(h.klass()))
    }

    /// Classes that must initialize before this one.
    pub fn klass_init_deps(&self, id: RecordId) -> Vec<RecordId> {
        self.read().klass(id).map(|k| k.init_deps.clone()).unwrap_or_default()
    }

    /// Compilation records depending on this class's initialization state.
    pub fn klass_comp_deps(&self, id: RecordId) -> Vec<RecordId> {
        self.read().klass(id).map(|k| k.comp_deps.clone()).unwrap_or_default()
    }

    /// Record that `dep` must initialize before `id`. Idempotent; returns
    /// whether a new edge was added.
    pub fn klass_add_init_dep(&self, id: RecordId, dep: RecordId) -> bool {
        let mut inner = self.write();
        if inner.klass(dep).is_none() {
            return false;
        }
        let Some(ktd) = inner.klass_mut(id) else {
            return false;
        };
        if ktd.init_deps.contains(&dep) {
            return false;
        }
        ktd.init_deps.push(dep);
        true
    }

    /// Transition a class to fully-initialized and resolve one inbound
    /// init-dependency on every compilation record that was waiting on it.
    ///
    /// The transition itself happens under the registry lock so that it
    /// cannot interleave with concurrent edge additions: every edge added
    /// before this call is decremented exactly once, and every edge added
    /// after it observes an initialized class and never increments.
    /// Must be called exactly once per class.
    pub fn notice_fully_initialized(&self, klass: &Arc<Klass>) {
        let inner = self.write();
        klass.set_init_state(InitState::FullyInitialized);
        self.metrics.init_transitions.fetch_add(1, Ordering::Relaxed);

        // Resolve by key, not through the class's cached index: the cache
        // belongs to the recording registry, and this graph may be a
        // restored one.
        let ktd = match inner.index.get(&TrainingKey::of_class(klass)) {
            Some(&id) => id,
            None => return,
        };
        let Some(record) = inner.klass(ktd) else {
            return;
        };
        for &cid in &record.comp_deps {
            if let Some(ctd) = inner.compile(cid) {
                // Saturating decrement: an edge recorded after the class
                // began initialization may already be resolved.
                let _ = ctd.init_deps_left.fetch_update(
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    |left| left.checked_sub(1),
                );
            }
        }
    }
}
