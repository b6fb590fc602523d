//! inferpool dispatch kernel.
//!
//! This crate implements the broker between completion requesters and the
//! volunteer compute fleet:
//!
//! - **[`queue`]** -- mode-adaptive priority queue holding in-flight tasks,
//!   keyed by `(priority, arrival_seq)` with three extraction policies.
//! - **[`dispatcher`]** -- task lifecycle owner: enqueue, claim, retry,
//!   deadline, and the temp-ban penalty for repeatedly unservable work.
//! - **[`rendezvous`]** -- one-shot result slots that let a worker's submit
//!   call wake the waiting request handler.
//! - **[`registry`]** -- closed model table with metadata-fingerprint
//!   verification of worker declarations.
//! - **[`task`]** -- the tracked unit of work.
//! - **[`error`]** -- unified kernel error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime. In-flight state is never persisted; a
//! restart drops the queue.

pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod registry;
pub mod rendezvous;
pub mod task;

// Re-export the most commonly used types at the crate root for convenience.
pub use dispatcher::{DispatchConfig, Dispatcher, TaskAssignment};
pub use error::{DispatchError, Result};
pub use queue::{QueueMode, TaskQueue};
pub use registry::{DeclaredModel, ModelDeclaration, ModelMeta, ModelRegistry, ModelSpec};
pub use rendezvous::RendezvousTable;
pub use task::{MAX_TRIES, Task, TaskId};
