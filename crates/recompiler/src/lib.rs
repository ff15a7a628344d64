//! # Lyra recompiler
//!
//! Replays a restored training schedule: a load-gated driver walks the
//! archived method list and re-promotes each entry to top-tier code
//! through the ambient compiler broker, pacing itself against a
//! time-decayed estimate of compile-queue load.
//!
//! ```text
//! lyra-training (recorded history)
//!   └── RestoredTrainingData — records + schedule
//!
//! lyra-recompiler (this crate)
//!   ├── load      — weighted-moving-average queue-load estimator
//!   ├── schedule  — per-slot claim/done bits over the archived list
//!   ├── driver    — the stepwise, load-gated scan
//!   ├── broker    — the compiler-enqueue seam
//!   └── worker    — background thread draining compile tasks
//! ```
//!
//! The driver never blocks: slots that cannot make progress yet are left
//! for the next step, and pacing is entirely the caller's concern — a
//! periodic worker thread calls [`driver::RecompilationDriver::have_work`]
//! and [`driver::RecompilationDriver::recompilation_step`].

pub mod broker;
pub mod driver;
pub mod load;
pub mod schedule;
pub mod worker;

pub use broker::CompilerBroker;
pub use driver::RecompilationDriver;
pub use load::LoadAverage;
pub use schedule::RecompilationSchedule;
pub use worker::CompileWorker;

#[cfg(test)]
mod tests;
