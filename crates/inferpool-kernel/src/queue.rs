//! Mode-adaptive priority queue.
//!
//! The queue holds in-flight tasks as `(priority, arrival_seq)` keyed
//! entries and supports three extraction policies:
//!
//! - **[`QueueMode::PureFifo`]** -- smallest `arrival_seq` wins, priorities
//!   ignored.
//! - **[`QueueMode::TwoLevel`]** -- any credited task (`priority > 0`) wins
//!   over any free-tier task; FIFO inside each band.
//! - **[`QueueMode::StrictPriority`]** -- largest `priority` wins, ties
//!   broken by smallest `arrival_seq`.
//!
//! All operations serialize under a single mutex.  The queue sees at most
//! one operation per in-flight request, so the O(N) selection scan is never
//! a bottleneck at the depths this system reaches.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::task::{Task, TaskId};

/// Extraction policy for [`TaskQueue::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueMode {
    /// Deliver strictly in arrival order.
    PureFifo,
    /// Credited tasks first, FIFO within each band.
    TwoLevel,
    /// Highest priority first, FIFO among equals.
    StrictPriority,
}

/// One queued task together with its scheduling key.
struct QueueEntry {
    priority: i64,
    seq: u64,
    task: Arc<Task>,
}

struct QueueInner {
    entries: Vec<QueueEntry>,
    next_seq: u64,
}

/// Thread-safe, mode-adaptive task queue.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
}

impl TaskQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                entries: Vec::new(),
                next_seq: 0,
            }),
        }
    }

    /// Enqueue a task at the given priority, recording an arrival sequence
    /// number used as the FIFO tiebreaker.
    pub fn put(&self, task: Arc<Task>, priority: i64) -> Result<u64> {
        let mut inner = self.locked()?;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push(QueueEntry {
            priority,
            seq,
            task,
        });

        tracing::debug!(seq, priority, "task enqueued");
        Ok(seq)
    }

    /// Remove and return the next task under `mode`, or `None` when the
    /// queue is empty.
    pub fn get(&self, mode: QueueMode) -> Result<Option<Arc<Task>>> {
        let mut inner = self.locked()?;

        let idx = match mode {
            QueueMode::PureFifo => Self::min_by_seq(&inner.entries, |_| true),
            QueueMode::TwoLevel => Self::min_by_seq(&inner.entries, |e| e.priority > 0)
                .or_else(|| Self::min_by_seq(&inner.entries, |_| true)),
            QueueMode::StrictPriority => inner
                .entries
                .iter()
                .map(|e| e.priority)
                .max()
                .and_then(|best| Self::min_by_seq(&inner.entries, |e| e.priority == best)),
        };

        Ok(idx.map(|idx| inner.entries.remove(idx).task))
    }

    /// Remove a task by id if present.  Removes at most one entry; a no-op
    /// when the task is not queued.
    pub fn remove(&self, task_id: TaskId) -> Result<bool> {
        let mut inner = self.locked()?;
        match inner.entries.iter().position(|e| e.task.task_id == task_id) {
            Some(idx) => {
                inner.entries.remove(idx);
                tracing::debug!(%task_id, "task removed from queue");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Number of queued tasks.
    ///
    /// The count stays valid even if a panicking handler poisoned the lock,
    /// so this read-only gauge recovers the guard instead of failing.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    /// Whether the queue holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the lock, surfacing poisoning as a dispatch error rather than a
    /// panic in the request handler.
    fn locked(&self) -> Result<MutexGuard<'_, QueueInner>> {
        self.inner
            .lock()
            .map_err(|e| DispatchError::QueuePoisoned(e.to_string()))
    }

    /// Index of the entry with the smallest `seq` among those matching
    /// `filter`.
    fn min_by_seq(entries: &[QueueEntry], filter: impl Fn(&QueueEntry) -> bool) -> Option<usize> {
        entries
            .iter()
            .enumerate()
            .filter(|(_, e)| filter(e))
            .min_by_key(|(_, e)| e.seq)
            .map(|(idx, _)| idx)
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
