//! Content-identity keys for training records.
//!
//! A class is identified by its internal name plus loader name; a method by
//! its holder's identity plus method name and signature. Symbols are
//! interned, so equality and hashing are identity-based and cheap. The
//! archive hash is content-based instead — a wrapping sum of per-symbol
//! content hashes — so it is stable across processes, but it is only
//! defined once every symbol of the key lives in a shared archive region.

use std::sync::Arc;

use lyra_common::{Klass, Method, Symbol};

/// Identity of a training record.
///
/// `Empty` marks a record that was installed and later retracted; empty
/// keys are never unique and never archived.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrainingKey {
    Empty,
    Klass {
        name: Symbol,
        loader: Symbol,
    },
    Method {
        class_name: Symbol,
        loader: Symbol,
        name: Symbol,
        signature: Symbol,
    },
}

impl TrainingKey {
    pub fn of_class(klass: &Klass) -> Self {
        TrainingKey::Klass {
            name: klass.name().clone(),
            loader: klass.loader_name().clone(),
        }
    }

    /// Key for a method, or `None` if its holder class is gone.
    pub fn of_method(method: &Arc<Method>) -> Option<Self> {
        let holder = method.holder()?;
        Some(TrainingKey::Method {
            class_name: holder.name().clone(),
            loader: holder.loader_name().clone(),
            name: method.name().clone(),
            signature: method.signature().clone(),
        })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, TrainingKey::Empty)
    }

    /// The symbols this key references, in a fixed order.
    pub fn symbols(&self) -> Vec<&Symbol> {
        match self {
            TrainingKey::Empty => Vec::new(),
            TrainingKey::Klass { name, loader } => vec![name, loader],
            TrainingKey::Method {
                class_name,
                loader,
                name,
                signature,
            } => vec![class_name, loader, name, signature],
        }
    }

    /// Whether the archive hash is defined for this key: non-empty, with
    /// every symbol living in a shared archive region.
    pub fn can_compute_archive_hash(&self) -> bool {
        !self.is_empty() && self.symbols().iter().all(|s| s.is_shared())
    }

    /// Archive-stable hash: wrapping sum of per-symbol content hashes.
    /// `None` when the key is not archivable.
    pub fn archive_hash(&self) -> Option<u64> {
        if !self.can_compute_archive_hash() {
            return None;
        }
        Some(
            self.symbols()
                .iter()
                .fold(0u64, |acc, s| acc.wrapping_add(u64::from(s.archive_hash()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyra_common::Runtime;

    #[test]
    fn test_class_key_identity() {
        let runtime = Runtime::new();
        let a = runtime.define_class("com/example/App", "app");

        let k1 = TrainingKey::of_class(&a);
        let k2 = TrainingKey::of_class(&a);
        assert_eq!(k1, k2);

        let b = runtime.define_class("com/example/App", "ext");
        assert_ne!(k1, TrainingKey::of_class(&b));
    }

    #[test]
    fn test_method_key_requires_live_holder() {
        let runtime = Runtime::new();
        let klass = runtime.define_class("A", "app");
        let method = klass.define_method(runtime.intern("run"), runtime.intern("()V"));

        let key = TrainingKey::of_method(&method).expect("holder alive");
        assert!(matches!(key, TrainingKey::Method { .. }));

        // Detached class: key construction fails quietly.
        let syms = lyra_common::SymbolTable::new();
        let orphan_class = Klass::new(syms.intern("B"), syms.intern("app"));
        let orphan = orphan_class.define_method(syms.intern("f"), syms.intern("()V"));
        drop(orphan_class);
        assert!(TrainingKey::of_method(&orphan).is_none());
    }

    #[test]
    fn test_archive_hash_needs_shared_symbols() {
        let runtime = Runtime::new();
        let klass = runtime.define_class("A", "app");
        let key = TrainingKey::of_class(&klass);

        assert!(!key.can_compute_archive_hash());
        assert_eq!(key.archive_hash(), None);

        for sym in key.symbols() {
            sym.mark_shared();
        }
        assert!(key.can_compute_archive_hash());
        assert!(key.archive_hash().is_some());
    }

    #[test]
    fn test_archive_hash_is_stable_across_runtimes() {
        // Two separate processes are modeled by two separate runtimes.
        let hash_in = |runtime: &Runtime| {
            let klass = runtime.define_class("com/example/App", "app");
            let key = TrainingKey::of_class(&klass);
            for sym in key.symbols() {
                sym.mark_shared();
            }
            key.archive_hash().expect("shared symbols")
        };

        assert_eq!(hash_in(&Runtime::new()), hash_in(&Runtime::new()));
    }

    #[test]
    fn test_empty_key_is_never_archivable() {
        assert!(TrainingKey::Empty.is_empty());
        assert!(!TrainingKey::Empty.can_compute_archive_hash());
        assert_eq!(TrainingKey::Empty.archive_hash(), None);
    }
}
