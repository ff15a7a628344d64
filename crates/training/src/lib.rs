//! # Lyra training-data core
//!
//! Records what the running program compiled — classes, methods, and each
//! past JIT compilation with its initialization dependencies — and persists
//! that history so a later run can replay it as a recompilation schedule.
//!
//! ```text
//! lyra-common (runtime model)
//!   └── Symbol / Klass / Method / Clock
//!
//! lyra-training (this crate)
//!   ├── key       — content-identity keys, archive-stable hashes
//!   ├── graph     — the training-record registry (KTD / MTD / CTD)
//!   ├── task      — compile tasks and the active-task barrier
//!   ├── archive   — dump / restore of the graph and schedule
//!   └── context   — the owning context and the global accessor
//!
//! lyra-recompiler (consumer)
//!   └── load / schedule / driver over the restored data
//! ```
//!
//! The registry owns every record in an arena; records reference each
//! other by stable [`graph::RecordId`] indices, never by pointer. All
//! fallible lookups return `Option`; only archive decoding returns a
//! `Result`.

pub mod archive;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod key;
pub mod metrics;
pub mod task;

pub use config::TrainingConfig;
pub use context::TrainingContext;
pub use error::ArchiveError;
pub use graph::{MAX_TIER, RecordId, RecordKind, TrainingGraph};
pub use key::TrainingKey;
pub use metrics::TrainingMetrics;
pub use task::{ActiveTasks, CompileReason, CompileTask};
