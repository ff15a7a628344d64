//! Live class model.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::method::Method;
use crate::symbol::Symbol;

/// Initialization state of a class, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum InitState {
    Allocated = 0,
    Loaded = 1,
    Linked = 2,
    BeingInitialized = 3,
    FullyInitialized = 4,
    InitError = 5,
}

impl InitState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => InitState::Allocated,
            1 => InitState::Loaded,
            2 => InitState::Linked,
            3 => InitState::BeingInitialized,
            4 => InitState::FullyInitialized,
            _ => InitState::InitError,
        }
    }

    /// Whether initialization has at least begun (successfully or not).
    pub fn has_begun_initialization(self) -> bool {
        self >= InitState::BeingInitialized
    }
}

/// A loaded class: name, defining-loader name, initialization state, and
/// its methods. Shared via `Arc`; all state is interior-mutable so the
/// runtime can transition classes while training records observe them.
pub struct Klass {
    name: Symbol,
    loader_name: Symbol,
    state: AtomicU8,
    methods: RwLock<Vec<Arc<Method>>>,
    /// CAS-once cache of this class's training-record index.
    training_slot: AtomicU32,
    /// Marks a class the archive must not retain.
    archive_excluded: AtomicBool,
}

impl Klass {
    /// Sentinel for an unset [`Klass::cached_training`] slot.
    pub const NO_TRAINING: u32 = u32::MAX;

    pub fn new(name: Symbol, loader_name: Symbol) -> Arc<Self> {
        Arc::new(Self {
            name,
            loader_name,
            state: AtomicU8::new(InitState::Loaded as u8),
            methods: RwLock::new(Vec::new()),
            training_slot: AtomicU32::new(Self::NO_TRAINING),
            archive_excluded: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &Symbol {
        &self.name
    }

    pub fn loader_name(&self) -> &Symbol {
        &self.loader_name
    }

    pub fn init_state(&self) -> InitState {
        InitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_init_state(&self, state: InitState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.init_state() == InitState::FullyInitialized
    }

    /// Define a new method on this class and return it.
    pub fn define_method(self: &Arc<Self>, name: Symbol, signature: Symbol) -> Arc<Method> {
        let method = Method::new(name, signature, Arc::downgrade(self));
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut methods = self.methods.write().unwrap();
        methods.push(Arc::clone(&method));
        method
    }

    pub fn find_method(&self, name: &Symbol, signature: &Symbol) -> Option<Arc<Method>> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let methods = self.methods.read().unwrap();
        methods
            .iter()
            .find(|m| m.name() == name && m.signature() == signature)
            .cloned()
    }

    pub fn methods(&self) -> Vec<Arc<Method>> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let methods = self.methods.read().unwrap();
        methods.clone()
    }

    /// Cached training-record index, if one was published.
    pub fn cached_training(&self) -> Option<u32> {
        let raw = self.training_slot.load(Ordering::Acquire);
        (raw != Self::NO_TRAINING).then_some(raw)
    }

    /// Publish a training-record index at most once. Returns the winning
    /// index — the caller's on success, the earlier winner's on a lost race.
    pub fn cache_training(&self, index: u32) -> u32 {
        match self.training_slot.compare_exchange(
            Self::NO_TRAINING,
            index,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => index,
            Err(existing) => existing,
        }
    }

    pub fn is_archive_excluded(&self) -> bool {
        self.archive_excluded.load(Ordering::Acquire)
    }

    pub fn set_archive_excluded(&self) {
        self.archive_excluded.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Klass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Klass")
            .field("name", &self.name)
            .field("loader", &self.loader_name)
            .field("state", &self.init_state())
            .finish_non_exhaustive()
    }
}

pub(crate) type WeakKlass = Weak<Klass>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;

    #[test]
    fn test_init_state_transitions() {
        let syms = SymbolTable::new();
        let klass = Klass::new(syms.intern("A"), syms.intern("app"));

        assert_eq!(klass.init_state(), InitState::Loaded);
        assert!(!klass.is_initialized());
        assert!(!klass.init_state().has_begun_initialization());

        klass.set_init_state(InitState::BeingInitialized);
        assert!(klass.init_state().has_begun_initialization());
        assert!(!klass.is_initialized());

        klass.set_init_state(InitState::FullyInitialized);
        assert!(klass.is_initialized());
    }

    #[test]
    fn test_define_and_find_method() {
        let syms = SymbolTable::new();
        let klass = Klass::new(syms.intern("A"), syms.intern("app"));
        let name = syms.intern("run");
        let sig = syms.intern("()V");

        let method = klass.define_method(name.clone(), sig.clone());
        let found = klass.find_method(&name, &sig).expect("method defined");
        assert!(Arc::ptr_eq(&method, &found));
        assert!(klass.find_method(&sig, &name).is_none());
    }

    #[test]
    fn test_training_slot_publishes_once() {
        let syms = SymbolTable::new();
        let klass = Klass::new(syms.intern("A"), syms.intern("app"));

        assert_eq!(klass.cached_training(), None);
        assert_eq!(klass.cache_training(7), 7);
        // Losers observe the first winner.
        assert_eq!(klass.cache_training(9), 7);
        assert_eq!(klass.cached_training(), Some(7));
    }
}
