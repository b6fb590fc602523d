//! The unit of work tracked by the dispatcher.
//!
//! A [`Task`] is created when a user submits a completion request and lives
//! until a worker returns a result or the dispatch deadline expires.  The
//! identity and payload are immutable; the claim state (`try_count`,
//! `claimed_at`, `is_urgent`) mutates as workers pick the task up, and is
//! held in atomics so the waiting request handler can observe it without a
//! lock.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

/// Unique task identifier (UUID v4, matching the wire format workers echo
/// back on submit).
pub type TaskId = Uuid;

/// Maximum number of claim attempts per task.
pub const MAX_TRIES: u8 = 2;

/// A user-submitted completion request in flight.
#[derive(Debug)]
pub struct Task {
    /// Unique opaque identifier, assigned at creation.
    pub task_id: TaskId,
    /// Opaque completion payload, passed through unmodified to the worker.
    pub request_body: Value,
    /// User who submitted the request.
    pub requester_id: i64,
    /// Requester's credit at enqueue time; 0 is the free tier.
    pub priority: i64,
    /// Wall-clock milliseconds at creation.
    pub created_at: i64,

    /// Completed claim attempts. 0 at creation, incremented on each claim.
    try_count: AtomicU8,
    /// Wall-clock milliseconds at the most recent claim; 0 while unclaimed.
    claimed_at: AtomicI64,
    /// Set when the task was handed out under a non-FIFO mode.
    is_urgent: AtomicBool,
    /// Worker that claimed this task first. Set at most once, never cleared.
    first_provider_id: OnceLock<i64>,
}

impl Task {
    /// Create a fresh, unclaimed task.
    pub fn new(requester_id: i64, priority: i64, request_body: Value) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            request_body,
            requester_id,
            priority,
            created_at: Utc::now().timestamp_millis(),
            try_count: AtomicU8::new(0),
            claimed_at: AtomicI64::new(0),
            is_urgent: AtomicBool::new(false),
            first_provider_id: OnceLock::new(),
        }
    }

    /// Number of completed claim attempts.
    pub fn try_count(&self) -> u8 {
        self.try_count.load(Ordering::Acquire)
    }

    /// Milliseconds timestamp of the most recent claim, or `None` while the
    /// task sits in the queue.
    pub fn claimed_at(&self) -> Option<i64> {
        match self.claimed_at.load(Ordering::Acquire) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Worker that claimed this task first, if any claim has happened.
    pub fn first_provider_id(&self) -> Option<i64> {
        self.first_provider_id.get().copied()
    }

    /// Whether the task was last handed out under a non-FIFO mode.
    pub fn is_urgent(&self) -> bool {
        self.is_urgent.load(Ordering::Acquire)
    }

    /// Milliseconds elapsed since creation.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.created_at
    }

    /// Record a claim by `provider_id`.
    ///
    /// The first claim pins `first_provider_id`; later claims by other
    /// workers leave it untouched.
    pub fn mark_claimed(&self, provider_id: i64, urgent: bool) {
        let _ = self.first_provider_id.set(provider_id);
        self.claimed_at
            .store(Utc::now().timestamp_millis(), Ordering::Release);
        self.try_count.fetch_add(1, Ordering::AcqRel);
        self.is_urgent.store(urgent, Ordering::Release);
    }

    /// Release a stalled claim so the task can be re-enqueued.
    ///
    /// Only the claim timestamp is cleared; `try_count` and
    /// `first_provider_id` keep their history.
    pub fn clear_claim(&self) {
        self.claimed_at.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fresh_task_is_unclaimed() {
        let task = Task::new(42, 5, json!({"messages": []}));
        assert_eq!(task.try_count(), 0);
        assert!(task.claimed_at().is_none());
        assert!(task.first_provider_id().is_none());
        assert!(!task.is_urgent());
    }

    #[test]
    fn first_provider_is_sticky() {
        let task = Task::new(42, 0, json!({}));

        task.mark_claimed(9, false);
        assert_eq!(task.first_provider_id(), Some(9));
        assert_eq!(task.try_count(), 1);
        assert!(task.claimed_at().is_some());

        task.clear_claim();
        assert!(task.claimed_at().is_none());
        assert_eq!(task.first_provider_id(), Some(9));

        // A second worker claims; the first provider stays recorded.
        task.mark_claimed(13, true);
        assert_eq!(task.first_provider_id(), Some(9));
        assert_eq!(task.try_count(), 2);
        assert!(task.is_urgent());
    }
}
