//! Task dispatch and lifecycle.
//!
//! The dispatcher owns every piece of in-flight state: the mode-adaptive
//! [`TaskQueue`], the [`RendezvousTable`] that lets a worker's submit call
//! wake the waiting request, the [`ModelRegistry`] gate, and the last-fetch
//! timestamp that drives scheduling-mode selection.
//!
//! # Request lifecycle
//!
//! ```text
//! submit ──> queued ──> claimed ──> fulfilled
//!              ^            │
//!              └── retry ───┘  (one re-enqueue at priority+1 when a claim
//!                               stalls past the claim timeout)
//! ```
//!
//! A submitted request waits in two phases: an initial window in which any
//! outcome may happen, and — only if a worker claimed the task — a monitored
//! extension in which the dispatcher polls the claim and re-enqueues it once
//! if the worker stalls.  A request whose retries are exhausted earns its
//! submitter a temporary ban: repeated failure to complete is attributed to
//! the work, not the workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use inferpool_store::UserStore;

use crate::error::{DispatchError, Result};
use crate::queue::{QueueMode, TaskQueue};
use crate::registry::{DeclaredModel, ModelRegistry};
use crate::rendezvous::RendezvousTable;
use crate::task::{MAX_TRIES, Task, TaskId};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable thresholds for the dispatch lifecycle.
///
/// The defaults define the user-facing behavior; tests shrink the durations
/// to keep wall-clock time down.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Phase-1 window: how long a submitter waits before the claim state is
    /// consulted at all.
    pub initial_wait: Duration,

    /// Phase-2 window: how much longer a claimed task is monitored before
    /// the request gives up. Total deadline = `initial_wait + monitor_window`.
    pub monitor_window: Duration,

    /// A claim older than this is considered stalled and eligible for retry.
    pub claim_timeout: Duration,

    /// Poll interval of the phase-2 monitor.
    pub poll_interval: Duration,

    /// Tasks are discarded at fetch time when their remaining budget is
    /// within this margin of the relevant deadline.
    pub stale_margin: Duration,

    /// Length of the temporary ban applied when a request exhausts its
    /// retries.
    pub temp_ban: Duration,

    /// Inter-fetch gap below which workers are considered abundant
    /// (PURE_FIFO).
    pub fresh_fetch_window: Duration,

    /// Inter-fetch gap below which load is moderate (TWO_LEVEL); anything
    /// slower selects STRICT_PRIORITY.
    pub busy_fetch_window: Duration,

    /// Bump the requester's usage counters on successful completion.
    pub count_usage: bool,

    /// Bump the worker's contribution counter on successful submit.
    pub reward_contribution: bool,

    /// Debit one credit from the requester on successful completion.
    pub debit_credit: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_secs(60),
            monitor_window: Duration::from_secs(120),
            claim_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            stale_margin: Duration::from_secs(2),
            temp_ban: Duration::from_secs(180),
            fresh_fetch_window: Duration::from_secs(1),
            busy_fetch_window: Duration::from_secs(5),
            count_usage: true,
            reward_contribution: true,
            debit_credit: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A claimed task as handed to a worker.
#[derive(Debug, Clone, Serialize)]
pub struct TaskAssignment {
    /// Id the worker must echo back on submit.
    pub task_id: TaskId,
    /// The completion request, verbatim.
    pub request_body: Value,
    /// Whether the task was scheduled under a non-FIFO mode.
    pub is_urgent: bool,
    /// Which claim attempt this is (1 or 2).
    pub try_count: u8,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Owner of all in-flight dispatch state.
///
/// Shared behind an `Arc` across every request handler; all interior state
/// is independently synchronized, so no method takes `&mut self`.
pub struct Dispatcher {
    queue: TaskQueue,
    rendezvous: RendezvousTable,
    registry: ModelRegistry,
    users: UserStore,
    config: DispatchConfig,
    /// Wall-clock milliseconds of the most recent `fetch_task`, used as a
    /// proxy for offered load.
    last_fetch_ms: AtomicI64,
}

impl Dispatcher {
    /// Create a dispatcher over the given stores.
    #[must_use]
    pub fn new(users: UserStore, registry: ModelRegistry, config: DispatchConfig) -> Self {
        Self {
            queue: TaskQueue::new(),
            rendezvous: RendezvousTable::new(),
            registry,
            users,
            config,
            last_fetch_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    /// Validate a credential, mapping every failure mode to
    /// [`DispatchError::InvalidToken`].
    pub async fn authenticate(&self, user_id: i64, secret: &str) -> Result<()> {
        if self.users.validate(user_id, secret).await? {
            Ok(())
        } else {
            Err(DispatchError::InvalidToken)
        }
    }

    /// The model table this dispatcher serves.
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Number of tasks currently queued (excluding claimed ones).
    pub fn queued_tasks(&self) -> usize {
        self.queue.len()
    }

    // -- submit-completion --------------------------------------------------

    /// Accept a user's completion request, wait for a worker to answer it,
    /// and return the worker's response verbatim.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::InvalidToken`] on any credential failure.
    /// - [`DispatchError::InvalidModel`] when `model` names an unknown model.
    /// - [`DispatchError::Timeout`] when no result arrived inside the
    ///   dispatch deadline.
    ///
    /// Dropping the returned future (client disconnect) cleans up the queue
    /// and rendezvous entries without applying any ban.
    pub async fn submit_chat_completion(
        &self,
        user_id: i64,
        secret: &str,
        model: Option<&str>,
        request_body: Value,
    ) -> Result<Value> {
        self.authenticate(user_id, secret).await?;

        if let Some(model) = model
            && !self.registry.has(model)
        {
            return Err(DispatchError::InvalidModel {
                model: model.to_string(),
            });
        }

        let priority = self.users.get_credit(user_id).await?.max(0);
        let task = Arc::new(Task::new(user_id, priority, request_body));
        let task_id = task.task_id;

        let mut rx = self.rendezvous.register(task_id);

        // Removes the queue and rendezvous entries on every exit path,
        // including cancellation. All removals are idempotent.
        let _cleanup = InflightCleanup {
            dispatcher: self,
            task_id,
        };

        self.queue.put(Arc::clone(&task), priority)?;

        info!(
            %task_id,
            user_id,
            priority,
            queued = self.queue.len(),
            "completion request enqueued"
        );

        // Phase 1: plain wait for a result.
        match timeout(self.config.initial_wait, &mut rx).await {
            Ok(Ok(payload)) => return self.finish_success(&task, payload).await,
            Ok(Err(_)) => return self.finish_timeout(&task).await,
            Err(_) => {}
        }

        // Phase 2: only tasks a worker actually claimed earn the extension.
        if task.first_provider_id().is_none() {
            return self.finish_timeout(&task).await;
        }

        let deadline = Instant::now() + self.config.monitor_window;
        while Instant::now() < deadline {
            match timeout(self.config.poll_interval, &mut rx).await {
                Ok(Ok(payload)) => return self.finish_success(&task, payload).await,
                Ok(Err(_)) => break,
                Err(_) => self.maybe_retry(&task),
            }
        }

        self.finish_timeout(&task).await
    }

    /// Re-enqueue a stalled claim, promoting the task one priority level so
    /// it is picked up ahead of its original band.
    fn maybe_retry(&self, task: &Arc<Task>) {
        let Some(claimed_at) = task.claimed_at() else {
            return;
        };
        let claim_age = Utc::now().timestamp_millis() - claimed_at;
        if claim_age <= self.config.claim_timeout.as_millis() as i64
            || task.try_count() >= MAX_TRIES
        {
            return;
        }

        task.clear_claim();
        let promoted = task.priority + 1;
        if let Err(err) = self.queue.put(Arc::clone(task), promoted) {
            // The waiter still times out on its own deadline.
            warn!(%err, task_id = %task.task_id, "failed to re-enqueue stalled task");
            return;
        }

        warn!(
            task_id = %task.task_id,
            provider_id = ?task.first_provider_id(),
            claim_age_ms = claim_age,
            priority = promoted,
            "claim stalled, task re-enqueued"
        );
    }

    async fn finish_success(&self, task: &Task, payload: Value) -> Result<Value> {
        if self.config.count_usage
            && let Err(err) = self.users.record_usage(task.requester_id).await
        {
            warn!(%err, user_id = task.requester_id, "failed to record usage");
        }
        if self.config.debit_credit
            && let Err(err) = self.users.add_credit(task.requester_id, -1).await
        {
            warn!(%err, user_id = task.requester_id, "failed to debit credit");
        }

        info!(
            task_id = %task.task_id,
            tries = task.try_count(),
            "completion fulfilled"
        );
        Ok(payload)
    }

    async fn finish_timeout(&self, task: &Task) -> Result<Value> {
        // Two failed claims mean the work itself is unservable; penalize the
        // requester, not the workers.
        if task.try_count() > 1 {
            let until = Utc::now().timestamp() + self.config.temp_ban.as_secs() as i64;
            match self.users.set_temp_ban(task.requester_id, until).await {
                Ok(_) => warn!(
                    user_id = task.requester_id,
                    until, "requester temp banned after exhausted retries"
                ),
                Err(err) => warn!(%err, user_id = task.requester_id, "failed to set temp ban"),
            }
        }

        warn!(
            task_id = %task.task_id,
            tries = task.try_count(),
            "completion timed out"
        );
        Err(DispatchError::Timeout {
            task_id: task.task_id,
        })
    }

    // -- fetch-task ---------------------------------------------------------

    /// Hand the next suitable task to a worker, or `None` when the queue has
    /// nothing serviceable.
    ///
    /// The worker must declare its model; a metadata mismatch rejects the
    /// fetch before any task is consumed.
    pub async fn fetch_task(
        &self,
        worker_id: i64,
        secret: &str,
        declared: &DeclaredModel,
    ) -> Result<Option<TaskAssignment>> {
        self.authenticate(worker_id, secret).await?;

        if !self.registry.verify_model(declared) {
            return Err(DispatchError::InvalidModel {
                model: declared.id.clone(),
            });
        }

        let mode = self.select_mode();

        loop {
            let Some(task) = self.queue.get(mode)? else {
                return Ok(None);
            };

            // Tasks whose remaining budget cannot fit an inference round are
            // dropped here; their waiters clean up on their own deadline.
            if self.past_serviceable_window(&task) {
                debug!(
                    task_id = %task.task_id,
                    try_count = task.try_count(),
                    age_ms = task.age_ms(Utc::now().timestamp_millis()),
                    "discarding stale task"
                );
                continue;
            }

            task.mark_claimed(worker_id, mode != QueueMode::PureFifo);

            info!(
                task_id = %task.task_id,
                worker_id,
                ?mode,
                try_count = task.try_count(),
                "task claimed"
            );

            return Ok(Some(TaskAssignment {
                task_id: task.task_id,
                request_body: task.request_body.clone(),
                is_urgent: task.is_urgent(),
                try_count: task.try_count(),
            }));
        }
    }

    /// Pick the extraction policy from the time since the previous fetch and
    /// record this fetch.
    ///
    /// A short gap means workers are polling faster than work arrives, so
    /// fairness wins; a long gap means compute is scarce, so credit wins.
    fn select_mode(&self) -> QueueMode {
        let now = Utc::now().timestamp_millis();
        let last = self.last_fetch_ms.swap(now, Ordering::AcqRel);
        let gap = now.saturating_sub(last);

        let mode = if gap < self.config.fresh_fetch_window.as_millis() as i64 {
            QueueMode::PureFifo
        } else if gap < self.config.busy_fetch_window.as_millis() as i64 {
            QueueMode::TwoLevel
        } else {
            QueueMode::StrictPriority
        };

        debug!(gap_ms = gap, ?mode, "scheduling mode selected");
        mode
    }

    /// Whether a queued task is too old for the claim that would follow to
    /// finish inside the submitter's remaining deadline.
    fn past_serviceable_window(&self, task: &Task) -> bool {
        let elapsed = task.age_ms(Utc::now().timestamp_millis());
        let margin = self.config.stale_margin.as_millis() as i64;
        let first_deadline = self.config.initial_wait.as_millis() as i64;
        let second_deadline = first_deadline + self.config.claim_timeout.as_millis() as i64;

        match task.try_count() {
            0 => elapsed > first_deadline - margin,
            1 => elapsed > second_deadline - margin,
            // A task is never re-enqueued after its second claim; anything
            // else in the queue is a straggler.
            _ => true,
        }
    }

    // -- submit-result ------------------------------------------------------

    /// Deliver a worker's result to the waiting submitter.
    ///
    /// The response payload is forwarded verbatim; no shape validation is
    /// performed here.
    pub async fn submit_result(
        &self,
        worker_id: i64,
        secret: &str,
        task_id: TaskId,
        response: Value,
    ) -> Result<()> {
        self.authenticate(worker_id, secret).await?;

        self.rendezvous.fulfill(task_id, response)?;

        // Usually a no-op: a claimed task is not in the queue. A stalled
        // first worker can race a retry re-enqueue, though, and this sweeps
        // the duplicate entry. The result is already delivered, so a sweep
        // failure is logged rather than surfaced.
        if let Err(err) = self.queue.remove(task_id) {
            warn!(%err, %task_id, "failed to sweep queue entry");
        }

        if self.config.reward_contribution
            && let Err(err) = self.users.add_contribution(worker_id, 1).await
        {
            warn!(%err, worker_id, "failed to record contribution");
        }

        info!(%task_id, worker_id, "result delivered");
        Ok(())
    }
}

/// Drop guard that retires a task's queue and rendezvous entries on every
/// exit from `submit_chat_completion`, including cancellation.
struct InflightCleanup<'a> {
    dispatcher: &'a Dispatcher,
    task_id: TaskId,
}

impl Drop for InflightCleanup<'_> {
    fn drop(&mut self) {
        self.dispatcher.rendezvous.remove(self.task_id);
        let _ = self.dispatcher.queue.remove(self.task_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use inferpool_store::Database;

    async fn dispatcher(config: DispatchConfig) -> Dispatcher {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        Dispatcher::new(UserStore::new(db), ModelRegistry::builtin(), config)
    }

    #[test]
    fn default_config_matches_contract() {
        let config = DispatchConfig::default();
        assert_eq!(config.initial_wait, Duration::from_secs(60));
        assert_eq!(config.monitor_window, Duration::from_secs(120));
        assert_eq!(config.claim_timeout, Duration::from_secs(60));
        assert_eq!(config.temp_ban, Duration::from_secs(180));
        assert_eq!(config.fresh_fetch_window, Duration::from_secs(1));
        assert_eq!(config.busy_fetch_window, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn mode_selection_follows_fetch_gap() {
        let d = dispatcher(DispatchConfig {
            fresh_fetch_window: Duration::from_millis(80),
            busy_fetch_window: Duration::from_millis(200),
            ..DispatchConfig::default()
        })
        .await;

        // Back-to-back fetches: abundant workers.
        d.select_mode();
        assert_eq!(d.select_mode(), QueueMode::PureFifo);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(d.select_mode(), QueueMode::TwoLevel);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(d.select_mode(), QueueMode::StrictPriority);
    }

    #[tokio::test]
    async fn unknown_user_is_rejected() {
        let d = dispatcher(DispatchConfig::default()).await;
        let result = d
            .submit_chat_completion(404, "nope", None, serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(DispatchError::InvalidToken)));
    }

    #[tokio::test]
    async fn unknown_model_is_rejected_before_enqueue() {
        let d = dispatcher(DispatchConfig::default()).await;
        let token = d.users.create_or_update(1, None).await.unwrap();

        let result = d
            .submit_chat_completion(1, &token, Some("gpt-4"), serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(DispatchError::InvalidModel { .. })));
        assert_eq!(d.queued_tasks(), 0);
    }
}
