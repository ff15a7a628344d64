//! The compiler-broker seam.
//!
//! The recompilation driver never talks to a compiler directly; it
//! enqueues through this trait, and the embedding runtime provides the
//! implementation. This keeps the driver free of compiler dependencies
//! while letting tests substitute a recording stub.

use std::sync::Arc;

use lyra_common::Method;
use lyra_training::{CompileReason, CompileTask};

/// Interface to the ambient compilation broker.
pub trait CompilerBroker: Send + Sync {
    /// Current length of the compile queue feeding `level`.
    fn queue_size(&self, level: u8) -> usize;

    /// Enqueue a compilation request. Returns the queued task, or `None`
    /// when the request was refused (queue shut down, method not
    /// compilable); refusals are absorbed by the caller.
    fn compile_method(
        &self,
        method: &Arc<Method>,
        level: u8,
        reason: CompileReason,
        blocking: bool,
    ) -> Option<Arc<CompileTask>>;
}
