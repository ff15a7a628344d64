//! # Lyra runtime model
//!
//! The live-object model consumed by the training-data and recompilation
//! crates: interned symbols, classes and methods with their initialization
//! and compiled-code state, strong/weak class handles, and the monotonic
//! clock used for load sampling and lifecycle timestamps.
//!
//! This crate deliberately knows nothing about training records or
//! schedules — it is the substrate those crates observe and annotate.

pub mod clock;
pub mod handle;
pub mod klass;
pub mod method;
pub mod runtime;
pub mod symbol;

pub use clock::Clock;
pub use handle::{ClassStrongHandle, ClassWeakHandle};
pub use klass::{InitState, Klass};
pub use method::{CompiledCodeInfo, Method, MethodProfile};
pub use runtime::Runtime;
pub use symbol::{Symbol, SymbolTable};
