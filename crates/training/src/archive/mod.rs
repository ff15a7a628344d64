//! Archive round-trip: dump the training graph and schedule into a
//! persisted region, restore it in a later run.
//!
//! The persisted layout has a magic+version header followed by four
//! sections: the symbol string table, the flat record sequence (every
//! intra-archive reference stored as a section-relative index), the
//! hash→record dictionary, and the length-prefixed recompilation
//! schedule. The layout is little-endian regardless of host.

pub mod dump;
pub mod format;
pub mod restore;

pub use dump::{MethodProfiler, SampledMethod, TrainingDump};
pub use restore::RestoredTrainingData;
