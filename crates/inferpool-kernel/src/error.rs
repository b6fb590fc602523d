//! Kernel error types.
//!
//! All dispatch subsystems surface errors through [`DispatchError`], which is
//! the single error type returned by every public API in this crate.  Each
//! variant maps onto one of the HTTP-visible failure kinds, so the web edge
//! can translate without inspecting opaque strings.

use crate::task::TaskId;

/// Unified error type for the inferpool dispatch kernel.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The credential failed to parse, the user is unknown, banned, temp
    /// banned, or the secret does not match.
    #[error("invalid token")]
    InvalidToken,

    /// The requested or declared model is not served by this dispatcher.
    #[error("invalid model: {model}")]
    InvalidModel { model: String },

    /// The referenced task is unknown — already completed, timed out, or
    /// never existed.
    #[error("task not found: {task_id}")]
    TaskNotFound {
        /// The id that was looked up.
        task_id: TaskId,
    },

    /// No worker produced a result before the dispatch deadline.
    #[error("request timed out: {task_id}")]
    Timeout { task_id: TaskId },

    /// A required request field was absent.
    #[error("missing field: {field}")]
    MissingField { field: &'static str },

    /// The queue mutex was poisoned by a panicking handler thread.
    #[error("task queue unavailable: {0}")]
    QueuePoisoned(String),

    /// Credential-store I/O failed.
    #[error("store error: {0}")]
    Store(#[from] inferpool_store::StoreError),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, DispatchError>;
