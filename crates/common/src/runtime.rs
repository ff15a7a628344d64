//! Runtime universe: symbol table, loaded classes, clock.

use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

use crate::clock::Clock;
use crate::klass::Klass;
use crate::symbol::{Symbol, SymbolTable};

/// The live universe the training core observes: interned symbols, loaded
/// classes keyed by `(name, loader)`, and the process clock.
#[derive(Debug, Default)]
pub struct Runtime {
    symbols: SymbolTable,
    classes: RwLock<FxHashMap<(Symbol, Symbol), Arc<Klass>>>,
    clock: Clock,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn intern(&self, text: &str) -> Symbol {
        self.symbols.intern(text)
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Define a class, or return the already-defined one for the same
    /// name and loader.
    pub fn define_class(&self, name: &str, loader: &str) -> Arc<Klass> {
        let name = self.intern(name);
        let loader = self.intern(loader);
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut classes = self.classes.write().unwrap();
        classes
            .entry((name.clone(), loader.clone()))
            .or_insert_with(|| Klass::new(name, loader))
            .clone()
    }

    pub fn find_class(&self, name: &Symbol, loader: &Symbol) -> Option<Arc<Klass>> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let classes = self.classes.read().unwrap();
        classes.get(&(name.clone(), loader.clone())).cloned()
    }

    /// Number of classes defined so far.
    pub fn class_count(&self) -> usize {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let classes = self.classes.read().unwrap();
        classes.len()
    }
}
