//! Record store: records, the ready queue and the delayed retry heap.
//!
//! Everything here runs under the engine's single store lock. Transitions
//! publish a `TaskEvent` while the lock is held, so subscribers observe
//! them in order.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::app::TaskCounts;
use crate::domain::record::{CANCELLED, CANCELLED_BEFORE_EXECUTION};
use crate::domain::{TaskError, TaskEvent, TaskId, TaskRecord, TaskResult, TaskState};
use crate::typed::TaskDefinition;

const RETRY_SCHEDULED: &str = "Retry scheduled";
const MAX_RETRIES_EXCEEDED: &str = "Max retries exceeded";

/// What a queue entry carries: the record key, the body and its arguments.
#[derive(Clone)]
pub(crate) struct Dispatch {
    pub task_id: TaskId,
    pub definition: Arc<TaskDefinition>,
    pub args: serde_json::Value,
}

/// Delayed retry entry.
///
/// Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
/// `seq` keeps entries with the same deadline in push order.
struct ScheduledDispatch {
    next_run_at: Instant,
    seq: u64,
    dispatch: Dispatch,
}

impl PartialEq for ScheduledDispatch {
    fn eq(&self, other: &Self) -> bool {
        self.next_run_at == other.next_run_at && self.seq == other.seq
    }
}

impl Eq for ScheduledDispatch {}

impl PartialOrd for ScheduledDispatch {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledDispatch {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .next_run_at
            .cmp(&self.next_run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A dispatch handed to a worker, with the attempt's retry counters.
pub(crate) struct Lease {
    pub dispatch: Dispatch,
    pub worker: usize,
    pub retries: u32,
    pub max_retries: u32,
}

/// How a finished attempt was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    Finished(TaskState),
    RetryScheduled(Duration),
    Missing,
}

pub(crate) struct TaskStore {
    /// All task records (single source of truth).
    records: HashMap<TaskId, TaskRecord>,

    /// Ready queue, FIFO.
    ready: VecDeque<Dispatch>,

    /// Retries waiting out their backoff.
    scheduled: BinaryHeap<ScheduledDispatch>,

    next_seq: u64,

    events: broadcast::Sender<TaskEvent>,
}

impl TaskStore {
    pub(crate) fn new(events: broadcast::Sender<TaskEvent>) -> Self {
        Self {
            records: HashMap::new(),
            ready: VecDeque::new(),
            scheduled: BinaryHeap::new(),
            next_seq: 0,
            events,
        }
    }

    fn publish(&self, event: TaskEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub(crate) fn get(&self, task_id: &TaskId) -> Option<&TaskRecord> {
        self.records.get(task_id)
    }

    /// Insert a PENDING record and queue its dispatch.
    pub(crate) fn insert(&mut self, record: TaskRecord, dispatch: Dispatch) {
        let event = TaskEvent::from_record(&record);
        self.records.insert(record.id, record);
        self.ready.push_back(dispatch);
        self.publish(event);
    }

    /// Move retries whose backoff has elapsed onto the ready queue.
    pub(crate) fn promote_due(&mut self, now: Instant) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.next_run_at > now {
                break;
            }
            if let Some(entry) = self.scheduled.pop() {
                self.ready.push_back(entry.dispatch);
            }
        }
    }

    /// Earliest pending retry deadline.
    pub(crate) fn next_wake(&self) -> Option<Instant> {
        self.scheduled.peek().map(|entry| entry.next_run_at)
    }

    /// Pop the next runnable dispatch and mark it STARTED.
    ///
    /// Entries whose record was revoked while queued are dropped here.
    pub(crate) fn lease_next(&mut self, worker: usize, now: DateTime<Utc>) -> Option<Lease> {
        while let Some(dispatch) = self.ready.pop_front() {
            let Some(record) = self.records.get_mut(&dispatch.task_id) else {
                continue;
            };
            if !record.is_queued() {
                continue;
            }
            if record.cancel_requested {
                record.mark_revoked(CANCELLED_BEFORE_EXECUTION, now);
                let event = TaskEvent::from_record(record);
                self.publish(event);
                continue;
            }

            record.mark_started(worker, now);
            let lease = Lease {
                worker,
                retries: record.retries,
                max_retries: record.max_retries,
                dispatch,
            };
            let event = TaskEvent::from_record(record);
            self.publish(event);
            return Some(lease);
        }
        None
    }

    /// Record the outcome of a leased attempt.
    pub(crate) fn finish(
        &mut self,
        lease: Lease,
        outcome: TaskResult,
        now: DateTime<Utc>,
        clock_now: Instant,
    ) -> Completion {
        let dispatch = lease.dispatch;
        let Some(record) = self.records.get_mut(&dispatch.task_id) else {
            return Completion::Missing;
        };

        let completion = match outcome {
            Ok(_) | Err(TaskError::Retry(_)) if record.cancel_requested => {
                record.mark_revoked(CANCELLED, now);
                Completion::Finished(TaskState::Revoked)
            }
            Ok(value) => {
                record.mark_succeeded(value, now);
                Completion::Finished(TaskState::Success)
            }
            Err(TaskError::Retry(request)) => {
                record.consume_retry();
                if record.retries_exhausted() {
                    let info = request.error.as_deref().unwrap_or(MAX_RETRIES_EXCEEDED);
                    record.mark_failed(info, now);
                    Completion::Finished(TaskState::Failure)
                } else {
                    let delay = dispatch.definition.policy().delay_for(&request);
                    let info = request.error.as_deref().unwrap_or(RETRY_SCHEDULED);
                    record.schedule_retry(info, delay, now);
                    Completion::RetryScheduled(delay)
                }
            }
            Err(TaskError::Fatal(message)) => {
                record.mark_failed(message, now);
                Completion::Finished(TaskState::Failure)
            }
        };

        let event = TaskEvent::from_record(record);
        self.publish(event);

        if let Completion::RetryScheduled(delay) = completion {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.scheduled.push(ScheduledDispatch {
                next_run_at: clock_now + delay,
                seq,
                dispatch,
            });
        }
        completion
    }

    /// Request cancellation. Returns `false` for unknown or terminal records.
    ///
    /// Queued records (PENDING, RETRY) are revoked immediately; a STARTED
    /// record only gets the flag and is revoked when its body returns.
    pub(crate) fn cancel(&mut self, task_id: &TaskId, now: DateTime<Utc>) -> bool {
        let Some(record) = self.records.get_mut(task_id) else {
            return false;
        };
        if !record.request_cancel(now) {
            return false;
        }
        if record.is_queued() {
            record.mark_revoked(CANCELLED_BEFORE_EXECUTION, now);
            let event = TaskEvent::from_record(record);
            self.ready.retain(|d| d.task_id != *task_id);
            self.publish(event);
        }
        true
    }

    pub(crate) fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for record in self.records.values() {
            match record.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Started => counts.started += 1,
                TaskState::Success => counts.success += 1,
                TaskState::Failure => counts.failure += 1,
                TaskState::Retry => counts.retry += 1,
                TaskState::Revoked => counts.revoked += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RetryRequest;
    use crate::queue::RetryPolicy;
    use crate::typed::{Handler, Task, TaskRegistry};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use ulid::Ulid;

    #[derive(Serialize, Deserialize)]
    struct Noop;

    impl Task for Noop {
        const NAME: &'static str = "test.noop";
    }

    struct NoopHandler;

    #[async_trait]
    impl Handler<Noop> for NoopHandler {
        async fn handle(&self, _args: Noop) -> TaskResult {
            Ok(serde_json::Value::Null)
        }
    }

    fn definition(max_retries: u32) -> Arc<TaskDefinition> {
        let mut registry = TaskRegistry::new();
        registry
            .register::<Noop, _>(
                NoopHandler,
                RetryPolicy::new(max_retries).with_default_delay(Duration::from_secs(5)),
            )
            .unwrap();
        registry.get("test.noop").unwrap()
    }

    fn store() -> (TaskStore, broadcast::Receiver<TaskEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (TaskStore::new(tx), rx)
    }

    fn submit(store: &mut TaskStore, max_retries: u32) -> TaskId {
        let id = TaskId::from_ulid(Ulid::new());
        let record = TaskRecord::new(id, "test.noop", max_retries, Utc::now());
        let dispatch = Dispatch {
            task_id: id,
            definition: definition(max_retries),
            args: json!(null),
        };
        store.insert(record, dispatch);
        id
    }

    #[test]
    fn insert_queues_a_pending_record() {
        let (mut store, mut rx) = store();
        let id = submit(&mut store, 0);

        assert_eq!(store.ready_len(), 1);
        assert_eq!(store.get(&id).unwrap().state, TaskState::Pending);
        assert_eq!(rx.try_recv().unwrap().state, TaskState::Pending);
        assert_eq!(store.counts().pending, 1);
    }

    #[test]
    fn lease_marks_started_with_worker() {
        let (mut store, _rx) = store();
        let id = submit(&mut store, 0);

        let lease = store.lease_next(2, Utc::now()).unwrap();
        assert_eq!(lease.dispatch.task_id, id);
        assert_eq!(lease.worker, 2);

        let record = store.get(&id).unwrap();
        assert_eq!(record.state, TaskState::Started);
        assert_eq!(record.worker, Some(2));
        assert!(store.lease_next(0, Utc::now()).is_none());
    }

    #[test]
    fn retry_goes_to_the_heap_then_back_to_ready() {
        let (mut store, _rx) = store();
        let id = submit(&mut store, 2);
        let lease = store.lease_next(0, Utc::now()).unwrap();

        let start = Instant::now();
        let completion = store.finish(lease, Err(TaskError::retry("flaky")), Utc::now(), start);
        assert_eq!(completion, Completion::RetryScheduled(Duration::from_secs(5)));

        let record = store.get(&id).unwrap();
        assert_eq!(record.state, TaskState::Retry);
        assert_eq!(record.retries, 1);
        assert_eq!(record.info.as_deref(), Some("flaky"));
        assert_eq!(store.next_wake(), Some(start + Duration::from_secs(5)));

        store.promote_due(start + Duration::from_secs(4));
        assert!(!store.has_ready());
        store.promote_due(start + Duration::from_secs(5));
        assert!(store.has_ready());
        assert!(store.lease_next(0, Utc::now()).is_some());
    }

    #[test]
    fn retry_without_error_uses_default_info() {
        let (mut store, _rx) = store();
        let id = submit(&mut store, 1);
        let lease = store.lease_next(0, Utc::now()).unwrap();
        store.finish(
            lease,
            Err(TaskError::Retry(RetryRequest::new(None, None))),
            Utc::now(),
            Instant::now(),
        );
        assert_eq!(store.get(&id).unwrap().info.as_deref(), Some("Retry scheduled"));
    }

    #[test]
    fn exceeding_the_budget_fails() {
        let (mut store, _rx) = store();
        let id = submit(&mut store, 0);
        let lease = store.lease_next(0, Utc::now()).unwrap();

        let completion = store.finish(
            lease,
            Err(TaskError::Retry(RetryRequest::new(None, None))),
            Utc::now(),
            Instant::now(),
        );
        assert_eq!(completion, Completion::Finished(TaskState::Failure));

        let record = store.get(&id).unwrap();
        assert_eq!(record.retries, 1);
        assert_eq!(record.info.as_deref(), Some("Max retries exceeded"));
        assert!(store.next_wake().is_none());
    }

    #[test]
    fn cancel_while_pending_revokes_and_drops_the_entry() {
        let (mut store, _rx) = store();
        let id = submit(&mut store, 0);

        assert!(store.cancel(&id, Utc::now()));
        let record = store.get(&id).unwrap();
        assert_eq!(record.state, TaskState::Revoked);
        assert_eq!(record.info.as_deref(), Some(CANCELLED_BEFORE_EXECUTION));
        assert!(!store.has_ready());

        // second cancel: terminal, refused
        assert!(!store.cancel(&id, Utc::now()));
    }

    #[test]
    fn cancel_while_retrying_skips_the_heap_entry() {
        let (mut store, _rx) = store();
        let id = submit(&mut store, 3);
        let lease = store.lease_next(0, Utc::now()).unwrap();
        let start = Instant::now();
        store.finish(lease, Err(TaskError::retry("later")), Utc::now(), start);

        assert!(store.cancel(&id, Utc::now()));
        assert_eq!(store.get(&id).unwrap().state, TaskState::Revoked);

        store.promote_due(start + Duration::from_secs(60));
        assert!(store.lease_next(0, Utc::now()).is_none());
        assert_eq!(store.get(&id).unwrap().state, TaskState::Revoked);
    }

    #[test]
    fn cancel_while_started_revokes_at_completion() {
        let (mut store, _rx) = store();
        let id = submit(&mut store, 0);
        let lease = store.lease_next(0, Utc::now()).unwrap();

        assert!(store.cancel(&id, Utc::now()));
        assert_eq!(store.get(&id).unwrap().state, TaskState::Started);

        let completion = store.finish(lease, Ok(json!("done")), Utc::now(), Instant::now());
        assert_eq!(completion, Completion::Finished(TaskState::Revoked));
        let record = store.get(&id).unwrap();
        assert_eq!(record.info.as_deref(), Some(CANCELLED));
        assert!(record.result.is_none());
    }

    #[test]
    fn fatal_error_fails_even_when_cancelled() {
        let (mut store, _rx) = store();
        let id = submit(&mut store, 3);
        let lease = store.lease_next(0, Utc::now()).unwrap();
        store.cancel(&id, Utc::now());

        store.finish(lease, Err(TaskError::fatal("boom")), Utc::now(), Instant::now());
        let record = store.get(&id).unwrap();
        assert_eq!(record.state, TaskState::Failure);
        assert_eq!(record.info.as_deref(), Some("boom"));
    }

    #[test]
    fn cancel_unknown_id_is_a_noop() {
        let (mut store, _rx) = store();
        assert!(!store.cancel(&TaskId::from_ulid(Ulid::new()), Utc::now()));
    }

    #[test]
    fn events_follow_transition_order() {
        let (mut store, mut rx) = store();
        submit(&mut store, 0);
        let lease = store.lease_next(0, Utc::now()).unwrap();
        store.finish(lease, Ok(json!(1)), Utc::now(), Instant::now());

        let states: Vec<TaskState> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.state)
            .collect();
        assert_eq!(
            states,
            vec![TaskState::Pending, TaskState::Started, TaskState::Success]
        );
    }
}
