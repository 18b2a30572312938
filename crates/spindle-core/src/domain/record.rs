//! TaskRecord - 1 回の投入ごとの状態レコード
//!
//! 遷移はすべて store のロックの下で、ここにあるメソッド経由で行います。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ids::TaskId;
use super::state::TaskState;

/// Info recorded when a task is revoked before its body ran.
pub const CANCELLED_BEFORE_EXECUTION: &str = "Task cancelled before execution";

/// Info recorded when cancellation is observed after the body ran.
pub const CANCELLED: &str = "Task cancelled";

/// State-tracking record for one task execution.
///
/// Design:
/// - This is the "single source of truth" for task state.
/// - Queue structures (ready/scheduled) hold the dispatch only.
/// - All state transitions happen here, under the store lock.
/// - Records are never evicted; they live as long as the engine.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,

    /// Success value (only present in `Success`).
    pub result: Option<serde_json::Value>,

    /// Human-readable status or error.
    pub info: Option<String>,

    /// Retry attempts consumed so far.
    pub retries: u32,

    /// Retry budget, copied from the definition at submit time.
    pub max_retries: u32,

    /// Set once by a cancel request, never cleared.
    pub cancel_requested: bool,

    /// Worker currently executing this record, if any.
    pub worker: Option<usize>,

    /// Backoff delay of the pending retry (for `Retry` state).
    #[serde(skip)]
    pub retry_delay: Option<Duration>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(id: TaskId, name: impl Into<String>, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            state: TaskState::Pending,
            result: None,
            info: None,
            retries: 0,
            max_retries,
            cancel_requested: false,
            worker: None,
            retry_delay: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A worker picked the record up.
    pub fn mark_started(&mut self, worker: usize, now: DateTime<Utc>) {
        self.state = TaskState::Started;
        self.worker = Some(worker);
        self.retry_delay = None;
        self.updated_at = now;
    }

    pub fn mark_succeeded(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.state = TaskState::Success;
        self.result = Some(result);
        self.info = None;
        self.worker = None;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, info: impl Into<String>, now: DateTime<Utc>) {
        self.state = TaskState::Failure;
        self.info = Some(info.into());
        self.worker = None;
        self.updated_at = now;
    }

    pub fn mark_revoked(&mut self, info: &str, now: DateTime<Utc>) {
        self.state = TaskState::Revoked;
        self.info = Some(info.to_string());
        self.worker = None;
        self.retry_delay = None;
        self.updated_at = now;
    }

    /// Consume one retry. Returns the new retry count.
    pub fn consume_retry(&mut self) -> u32 {
        self.retries += 1;
        self.retries
    }

    /// Is the retry budget exceeded?
    pub fn retries_exhausted(&self) -> bool {
        self.retries > self.max_retries
    }

    /// Park the record until its next attempt.
    pub fn schedule_retry(&mut self, info: impl Into<String>, delay: Duration, now: DateTime<Utc>) {
        self.state = TaskState::Retry;
        self.info = Some(info.into());
        self.worker = None;
        self.retry_delay = Some(delay);
        self.updated_at = now;
    }

    /// Record a cancel request. Returns `false` if the record is already terminal.
    pub fn request_cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.cancel_requested = true;
        self.updated_at = now;
        true
    }

    /// Not yet handed to a worker (submitted, or parked for a retry).
    pub fn is_queued(&self) -> bool {
        matches!(self.state, TaskState::Pending | TaskState::Retry)
    }
}
