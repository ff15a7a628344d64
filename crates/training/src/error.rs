//! Error types for the training-data core.
//!
//! The recording surface reports absence and rejection through `Option`
//! returns; only the archive codec has genuinely exceptional failures.

/// Errors raised while reading a persisted training archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The buffer does not start with the archive magic word.
    #[error("bad archive magic {0:#010x}")]
    BadMagic(u32),

    /// The archive was produced by an incompatible layout version.
    #[error("unsupported archive version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// The buffer ended before a field could be read.
    #[error("archive truncated: needed {needed} more bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// Structurally invalid content (out-of-range index, bad tag, ...).
    #[error("corrupt archive: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
