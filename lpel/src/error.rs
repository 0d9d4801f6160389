// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

//! Error types returned by the public [`crate::Lpel`] lifecycle API.
//!
//! The original C surface this crate is modeled on returns an integer status code from
//! every lifecycle function (`OK`, `ERR_FAIL`, `ERR_INVAL`, `ERR_ASSIGN`, `ERR_EXCL`). This
//! is the idiomatic mapping of that convention: one [`thiserror::Error`] variant per code,
//! carrying whatever context helps a caller understand *which* check failed.

use thiserror::Error;

/// Everything that can go wrong calling into the runtime's lifecycle API.
///
/// Worker-internal invariants (e.g. "a task is never on two ready queues") are enforced by
/// `assert!`/`debug_assert!` instead of this type — those indicate a bug in the runtime or
/// in a task body, not a recoverable condition a caller can react to.
#[derive(Debug, Error)]
pub enum LpelError {
    /// Generic, otherwise-unclassified failure (`ERR_FAIL`).
    #[error("lpel operation failed: {0}")]
    Fail(String),

    /// A configuration value was rejected during [`crate::LpelConfig::validate`] (`ERR_INVAL`).
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Human-readable description of the rejected field/combination.
        reason: String,
    },

    /// [`crate::affinity::pin_thread`] could not pin the calling thread to the requested
    /// core (`ERR_ASSIGN`). Non-fatal: the caller may choose to continue unpinned.
    #[error("failed to assign thread to core {core}: {source}")]
    Assign {
        /// The core index the caller attempted to pin to.
        core: usize,
        /// The underlying OS error, if one was reported.
        #[source]
        source: std::io::Error,
    },

    /// `EXCLUSIVE` was requested but the process does not hold the scheduling-elevation
    /// capability required to raise real-time FIFO priority (`ERR_EXCL`).
    #[error("exclusive scheduling requested but the process lacks elevation capability")]
    ExclusiveDenied,
}

/// Convenience alias used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, LpelError>;
