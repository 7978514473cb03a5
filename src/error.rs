//! # Error Handling for lightmq
//!
//! A single error enum ([`Error`]) covers every failure the broker can report
//! to its callers. The `thiserror` crate derives `Display` and the `From`
//! conversions that let `?` lift SQLite and I/O errors into it.
//!
//! ## Error Categories
//!
//! | Category | Examples | Typical Response |
//! |----------|----------|------------------|
//! | Validation | Empty topic or group name | Fix the call site |
//! | Storage | SQLite error, I/O error | Surface to the caller of `publish`/`subscribe` |
//! | Configuration | Zero gate capacity, logging already initialized | Fix configuration |
//! | Internal | Blocking storage task panicked | Log and investigate |
//!
//! Two failure modes deliberately never show up here:
//!
//! - Handler errors and checkpoint write failures are recovered inside the
//!   subscriber engine (logged, delivery continues).
//! - Reading a gate channel that was never opened is a programming error and
//!   panics in [`GateRegistry::channel`](crate::gate::GateRegistry::channel).

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in lightmq operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Validation Errors (caller bug, nothing was attempted)
    // =========================================================================

    /// An input failed validation, e.g. an empty topic or group name.
    ///
    /// Returned immediately from session construction and from `publish`;
    /// no state has been touched when this is returned.
    #[error("invalid input: {0}")]
    Validation(String),

    // =========================================================================
    // Storage Errors (propagated to the publish/subscribe caller)
    // =========================================================================

    /// SQLite operation failed.
    ///
    /// Wraps any error from the `rusqlite` crate: locked or corrupted database
    /// file, full disk, or a bad statement.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem operation failed while preparing the data directory.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema version mismatch or stored data that violates an invariant.
    #[error("schema error: {0}")]
    Schema(String),

    // =========================================================================
    // Configuration & Runtime Errors
    // =========================================================================

    /// A configuration value is unusable, or logging could not be installed.
    #[error("config error: {0}")]
    Config(String),

    /// A blocking storage task panicked or was cancelled before completing.
    #[error("storage task failed: {0}")]
    Task(String),
}

impl Error {
    /// Returns true for errors caused by invalid caller input.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
