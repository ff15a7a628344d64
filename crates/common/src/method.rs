//! Live method model.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use crate::klass::{Klass, WeakKlass};
use crate::symbol::Symbol;

/// Facts about the native code currently attached to a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledCodeInfo {
    /// Optimization tier of the installed code.
    pub level: u8,
    /// Size of the installed code in bytes.
    pub size: u32,
    /// Whether the code is a pre-compiled (AOT) entry rather than a
    /// JIT-produced one.
    pub is_aot: bool,
}

/// Profile descriptor lazily attached to a method once the profiler or the
/// recompilation driver needs one.
#[derive(Debug, Default)]
pub struct MethodProfile {
    pub invocation_count: AtomicU64,
    pub backedge_count: AtomicU64,
}

/// A method of a loaded class.
///
/// Holds a weak back-reference to its class (the class owns its methods
/// strongly), the currently installed native code, an optional profile
/// descriptor, and the CAS-once training-record cache slot.
pub struct Method {
    name: Symbol,
    signature: Symbol,
    holder: WeakKlass,
    code: RwLock<Option<CompiledCodeInfo>>,
    profile: OnceLock<MethodProfile>,
    /// CAS-once cache of this method's training-record index.
    training_slot: AtomicU32,
    /// Failure text of the most recent asynchronous compile attempt, left
    /// for whoever enqueued it to absorb.
    pending_failure: Mutex<Option<String>>,
    /// Set while a compile window must retain the method against
    /// redefinition.
    on_stack: AtomicBool,
}

impl Method {
    /// Sentinel for an unset [`Method::cached_training`] slot.
    pub const NO_TRAINING: u32 = u32::MAX;

    pub(crate) fn new(name: Symbol, signature: Symbol, holder: WeakKlass) -> Arc<Self> {
        Arc::new(Self {
            name,
            signature,
            holder,
            code: RwLock::new(None),
            profile: OnceLock::new(),
            training_slot: AtomicU32::new(Self::NO_TRAINING),
            pending_failure: Mutex::new(None),
            on_stack: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &Symbol {
        &self.name
    }

    pub fn signature(&self) -> &Symbol {
        &self.signature
    }

    /// The holder class, if it is still alive.
    pub fn holder(&self) -> Option<Arc<Klass>> {
        self.holder.upgrade()
    }

    /// Attach native code to this method, replacing whatever was installed.
    pub fn install_code(&self, info: CompiledCodeInfo) {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut code = self.code.write().unwrap();
        *code = Some(info);
    }

    pub fn clear_code(&self) {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut code = self.code.write().unwrap();
        *code = None;
    }

    pub fn installed_code(&self) -> Option<CompiledCodeInfo> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let code = self.code.read().unwrap();
        *code
    }

    pub fn has_native_code(&self) -> bool {
        self.installed_code().is_some()
    }

    pub fn has_profile(&self) -> bool {
        self.profile.get().is_some()
    }

    /// Get the profile descriptor, creating it on first use.
    pub fn ensure_profile(&self) -> &MethodProfile {
        self.profile.get_or_init(MethodProfile::default)
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

    /// Record the failure text of an asynchronous compile attempt.
    pub fn set_pending_compile_failure(&self, reason: String) {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut pending = self.pending_failure.lock().unwrap();
        *pending = Some(reason);
    }

    /// Take and clear the pending asynchronous compile failure, if any.
    pub fn take_pending_compile_failure(&self) -> Option<String> {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut pending = self.pending_failure.lock().unwrap();
        pending.take()
    }

    pub fn is_on_stack(&self) -> bool {
        self.on_stack.load(Ordering::Acquire)
    }

    pub fn set_on_stack(&self, value: bool) {
        self.on_stack.store(value, Ordering::Release);
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("code", &self.installed_code())
            .finish_non_exhaustive()
    }
}
