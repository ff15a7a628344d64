//! Interned symbols.
//!
//! Symbols are interned per [`SymbolTable`]: the same string interned twice
//! yields the same underlying allocation, so equality and hashing work by
//! identity. Each symbol also carries a content-stable 32-bit hash that is
//! identical across processes, which is what the archive dictionary keys
//! on, and a `shared` flag marking symbols that have been written into a
//! persisted archive region.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

#[derive(Debug)]
struct SymbolData {
    text: Box<str>,
    /// Content hash, stable across processes (crc32 of the UTF-8 bytes).
    archive_hash: u32,
    /// Set once the symbol has been written into an archive region.
    shared: AtomicBool,
}

/// An interned string with identity semantics.
///
/// Cheap to clone (one `Arc` bump). Two symbols from the same table compare
/// equal iff they were interned from the same string; symbols from
/// different tables never compare equal even for identical text — callers
/// that cross table boundaries must compare [`Symbol::archive_hash`] or
/// text instead.
#[derive(Clone)]
pub struct Symbol(Arc<SymbolData>);

impl Symbol {
    fn new(text: &str) -> Self {
        Symbol(Arc::new(SymbolData {
            text: text.into(),
            archive_hash: crc32fast::hash(text.as_bytes()),
            shared: AtomicBool::new(false),
        }))
    }

    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    /// Content-stable hash used for archive dictionary keys.
    pub fn archive_hash(&self) -> u32 {
        self.0.archive_hash
    }

    /// Whether this symbol has been written into an archive region.
    pub fn is_shared(&self) -> bool {
        self.0.shared.load(AtomicOrdering::Acquire)
    }

    /// Mark the symbol as living in an archive region.
    pub fn mark_shared(&self) {
        self.0.shared.store(true, AtomicOrdering::Release);
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.text.cmp(&other.0.text)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", &*self.0.text)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.text)
    }
}

/// Per-runtime symbol interner.
///
/// `intern` takes a read lock on the fast path and upgrades to a write
/// lock only for first-seen strings, double-checking after the upgrade.
#[derive(Debug, Default)]
pub struct SymbolTable {
    inner: RwLock<FxHashMap<Box<str>, Symbol>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning the canonical symbol for it.
    pub fn intern(&self, text: &str) -> Symbol {
        {
            #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
            let table = self.inner.read().unwrap();
            if let Some(sym) = table.get(text) {
                return sym.clone();
            }
        }

        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut table = self.inner.write().unwrap();
        // Double-check: another thread may have interned between the
        // read→write upgrade.
        if let Some(sym) = table.get(text) {
            return sym.clone();
        }
        let sym = Symbol::new(text);
        table.insert(text.into(), sym.clone());
        sym
    }

    /// Number of distinct symbols interned so far.
    pub fn len(&self) -> usize {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let table = self.inner.read().unwrap();
        table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
