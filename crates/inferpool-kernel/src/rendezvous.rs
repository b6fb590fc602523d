//! Rendezvous between submitters and workers.
//!
//! Each in-flight task owns a one-shot result slot: the submitting request
//! handler holds the receiving half and awaits it (with a deadline), while a
//! worker's submit call consumes the sending half to deliver the payload.
//! The table maps `task_id -> sender`; fulfilment removes the sender in the
//! same operation, so a result is delivered at most once and only while the
//! waiter is still present.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{DispatchError, Result};
use crate::task::TaskId;

/// Concurrent map of pending result slots.
///
/// Cheaply shareable behind an `Arc`; reads and writes lock only the touched
/// shard.
pub struct RendezvousTable {
    slots: DashMap<TaskId, oneshot::Sender<Value>>,
}

impl RendezvousTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Publish a fresh slot for `task_id` and return the receiving half for
    /// the waiter.
    ///
    /// Registering the same id twice replaces the previous slot, which
    /// cancels its waiter; ids are UUIDs so this does not happen in practice.
    pub fn register(&self, task_id: TaskId) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.slots.insert(task_id, tx);
        rx
    }

    /// Deliver `payload` into the slot for `task_id` and retire the entry.
    ///
    /// Fails with [`DispatchError::TaskNotFound`] when no slot exists
    /// (already fulfilled, timed out, or never registered) or when the
    /// waiter has already gone away.
    pub fn fulfill(&self, task_id: TaskId, payload: Value) -> Result<()> {
        let (_, tx) = self
            .slots
            .remove(&task_id)
            .ok_or(DispatchError::TaskNotFound { task_id })?;

        tx.send(payload)
            .map_err(|_| DispatchError::TaskNotFound { task_id })
    }

    /// Drop the slot for `task_id`, cancelling any waiter promptly.
    ///
    /// Returns `false` if no slot was present.
    pub fn remove(&self, task_id: TaskId) -> bool {
        self.slots.remove(&task_id).is_some()
    }

    /// Whether a slot for `task_id` is still pending.
    pub fn contains(&self, task_id: TaskId) -> bool {
        self.slots.contains_key(&task_id)
    }

    /// Number of pending slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slots are pending.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for RendezvousTable {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn fulfill_wakes_the_waiter() {
        let table = RendezvousTable::new();
        let id = Uuid::new_v4();
        let rx = table.register(id);

        table.fulfill(id, json!({"choices": []})).unwrap();
        assert_eq!(rx.await.unwrap(), json!({"choices": []}));
        assert!(!table.contains(id));
    }

    #[tokio::test]
    async fn fulfill_unknown_task_is_not_found() {
        let table = RendezvousTable::new();
        let result = table.fulfill(Uuid::new_v4(), json!({}));
        assert!(matches!(result, Err(DispatchError::TaskNotFound { .. })));
    }

    #[tokio::test]
    async fn second_fulfill_is_not_found() {
        let table = RendezvousTable::new();
        let id = Uuid::new_v4();
        let _rx = table.register(id);

        table.fulfill(id, json!(1)).unwrap();
        let second = table.fulfill(id, json!(2));
        assert!(matches!(second, Err(DispatchError::TaskNotFound { .. })));
    }

    #[tokio::test]
    async fn fulfill_after_waiter_dropped_is_not_found() {
        let table = RendezvousTable::new();
        let id = Uuid::new_v4();
        let rx = table.register(id);
        drop(rx);

        let result = table.fulfill(id, json!({}));
        assert!(matches!(result, Err(DispatchError::TaskNotFound { .. })));
    }

    #[tokio::test]
    async fn remove_cancels_the_waiter() {
        let table = RendezvousTable::new();
        let id = Uuid::new_v4();
        let rx = table.register(id);

        assert!(table.remove(id));
        assert!(rx.await.is_err());
        assert!(!table.remove(id));
    }
}
