//! Error taxonomy for the commit engine.
//!
//! Mirrors the taxonomy of the base design: corruption is fatal at mount,
//! I/O failures propagate and fail the current delta, allocation failures
//! leave staged state intact, and invariant violations are bugs.

use thiserror::Error;

/// Errors the commit engine can return.
#[derive(Debug, Error)]
pub enum CommitError {
    /// Underlying block I/O failed (read, write, or allocation).
    #[error("block i/o error: {0}")]
    Io(String),

    /// On-disk magic did not match what was expected.
    #[error("corrupt on-disk structure: expected magic {expected:#x}, found {found:#x}")]
    Corruption { expected: u64, found: u64 },

    /// The block allocator could not satisfy a request.
    #[error("block allocation failed: {0}")]
    Allocation(String),

    /// An invariant the engine relies on did not hold.
    ///
    /// In debug builds these are also checked with `debug_assert!` at the
    /// call site; this variant is what release builds see instead of a
    /// panic.
    #[error("commit engine invariant violated: {0}")]
    Invariant(&'static str),
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, CommitError>;
