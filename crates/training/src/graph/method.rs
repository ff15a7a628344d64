//! Method-record operations.

use std::sync::Arc;

use lyra_common::Method;

use super::{GraphInner, MethodTrainingData, RecordId, TrainingGraph, TrainingRecord, TIER_SLOTS};
use crate::key::TrainingKey;
use crate::metrics::TrainingMetrics;

/// Scalar facts adopted from an archived method record.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MethodFacts {
    pub(crate) levels_seen: u8,
    pub(crate) was_inlined: bool,
    pub(crate) was_toplevel: bool,
}

impl TrainingGraph {
    /// Find or create the method record for a live method.
    ///
    /// Lookup order: the method's cached record index, the registry, then
    /// the attached archive (whose scalar facts seed the new record).
    /// Returns `None` if the holder class is gone or a snapshot is in
    /// progress.
    pub fn method_make(&self, method: &Arc<Method>) -> Option<RecordId> {
        if let Some(cached) = method.cached_training() {
            return Some(RecordId::from_raw(cached));
        }
        let key = TrainingKey::of_method(method)?;
        if let Some(id) = self.find(&key) {
            method.cache_training(id.raw());
            return Some(id);
        }
        let facts = self.archived_method_facts(&key);
        let mut inner = self.write();
        Self::method_make_locked(&mut inner, &self.metrics, method, facts)
    }

    /// The `null_if_not_found` variant of [`TrainingGraph::method_make`]:
    /// never creates a record.
    pub fn method_find(&self, method: &Arc<Method>) -> Option<RecordId> {
        if let Some(cached) = method.cached_training() {
            return Some(RecordId::from_raw(cached));
        }
        let key = TrainingKey::of_method(method)?;
        self.find(&key)
    }

    pub(crate) fn method_make_locked(
        inner: &mut GraphInner,
        metrics: &TrainingMetrics,
        method: &Arc<Method>,
        facts: Option<MethodFacts>,
    ) -> Option<RecordId> {
        if let Some(cached) = method.cached_training() {
            return Some(RecordId::from_raw(cached));
        }
        let key = TrainingKey::of_method(method)?;
        let id = match inner.index.get(&key) {
            Some(&existing) => existing,
            None => {
                let holder_class = method.holder()?;
                let klass = Self::klass_make_locked(inner, metrics, &holder_class)?;
                let adopted = facts.unwrap_or_default();
                Self::install_locked(
                    inner,
                    metrics,
                    TrainingRecord::Method(MethodTrainingData {
                        key,
                        klass,
                        holder: Some(Arc::clone(method)),
                        compiles: Vec::new(),
                        last_toplevel: [None; TIER_SLOTS],
                        levels_seen: adopted.levels_seen,
                        was_inlined: adopted.was_inlined,
                        was_toplevel: adopted.was_toplevel,
                    }),
                )?
            }
        };
        method.cache_training(id.raw());
        Some(id)
    }

    pub(super) fn archived_method_facts(&self, key: &TrainingKey) -> Option<MethodFacts> {
        let archived = self.archived()?;
        let id = archived.lookup_archived(key)?;
        archived.graph().method_facts(id)
    }

    pub(crate) fn method_facts(&self, id: RecordId) -> Option<MethodFacts> {
        let inner = self.read();
        let mtd = inner.method(id)?;
        Some(MethodFacts {
            levels_seen: mtd.levels_seen,
            was_inlined: mtd.was_inlined,
            was_toplevel: mtd.was_toplevel,
        })
    }

    /// The live method behind a record, if any.
    pub fn method_holder(&self, id: RecordId) -> Option<Arc<Method>> {
        self.read().method(id)?.holder.clone()
    }

    /// The owning klass record.
    pub fn method_klass(&self, id: RecordId) -> Option<RecordId> {
        self.read().method(id).map(|m| m.klass)
    }

    /// All compilation records, in chronological order (newest last).
    pub fn method_compiles(&self, id: RecordId) -> Vec<RecordId> {
        self.read().method(id).map(|m| m.compiles.clone()).unwrap_or_default()
    }

    /// The last top-level compilation observed at `level`, by compile-id.
    pub fn last_toplevel_compile(&self, id: RecordId, level: u8) -> Option<RecordId> {
        let inner = self.read();
        let mtd = inner.method(id)?;
        mtd.last_toplevel.get(level as usize).copied().flatten()
    }

    /// Bitmask of tier levels that ever observed this method.
    pub fn levels_seen(&self, id: RecordId) -> u8 {
        self.read().method(id).map(|m| m.levels_seen).unwrap_or(0)
    }

    pub fn was_inlined(&self, id: RecordId) -> bool {
        self.read().method(id).is_some_and(|m| m.was_inlined)
    }

    pub fn was_toplevel(&self, id: RecordId) -> bool {
        self.read().method(id).is_some_and(|m| m.was_toplevel)
    }

    /// Record that this method was observed by a compilation at `level`,
    /// either as the compiled method itself or as an inlinee.
    pub fn notice_compilation(&self, id: RecordId, level: u8, inlined: bool) {
        let mut inner = self.write();
        Self::notice_compilation_locked(&mut inner, id, level, inlined);
    }

    pub(crate) fn notice_compilation_locked(
        inner: &mut GraphInner,
        id: RecordId,
        level: u8,
        inlined: bool,
    ) {
        let Some(mtd) = inner.method_mut(id) else {
            return;
        };
        if level < 8 {
            mtd.levels_seen |= 1 << level;
        }
        if inlined {
            mtd.was_inlined = true;
        } else {
            mtd.was_toplevel = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyra_common::Runtime;

    fn make_method(runtime: &Runtime) -> Arc<Method> {
        let klass = runtime.define_class("com/example/App", "app");
        klass.define_method(runtime.intern("run"), runtime.intern("()V"))
    }

    #[test]
    fn test_method_make_creates_owning_klass() {
        let runtime = Runtime::new();
        let graph = TrainingGraph::new();
        let method = make_method(&runtime);

        let mid = graph.method_make(&method).expect("created");
        let kid = graph.method_klass(mid).expect("klass record");
        assert_eq!(graph.kind(kid), Some(crate::graph::RecordKind::Klass));
        // One method record + its klass record.
        assert_eq!(graph.len(), 2);
        assert_eq!(method.cached_training(), Some(mid.raw()));
    }

    #[test]
    fn test_method_make_is_idempotent() {
        let runtime = Runtime::new();
        let graph = TrainingGraph::new();
        let method = make_method(&runtime);

        let a = graph.method_make(&method).expect("created");
        let b = graph.method_make(&method).expect("cached");
        assert_eq!(a, b);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_method_find_does_not_create() {
        let runtime = Runtime::new();
        let graph = TrainingGraph::new();
        let method = make_method(&runtime);

        assert!(graph.method_find(&method).is_none());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_notice_compilation_sets_levels_and_flags() {
        let runtime = Runtime::new();
        let graph = TrainingGraph::new();
        let method = make_method(&runtime);
        let mid = graph.method_make(&method).expect("created");

        graph.notice_compilation(mid, 1, false);
        graph.notice_compilation(mid, 4, true);

        assert_eq!(graph.levels_seen(mid), (1 << 1) | (1 << 4));
        assert!(graph.was_inlined(mid));
        assert!(graph.was_toplevel(mid));
    }

    #[test]
    fn test_method_make_fails_for_dead_holder() {
        let graph = TrainingGraph::new();
        let syms = lyra_common::SymbolTable::new();
        let klass = lyra_common::Klass::new(syms.intern("B"), syms.intern("app"));
        let method = klass.define_method(syms.intern("f"), syms.intern("()V"));
        drop(klass);

        assert!(graph.method_make(&method).is_none());
    }
}
