//! Status - ポーリング用のビュー
//!
//! `TaskStatus` は HTTP 層がそのまま JSON で返す形です。
//! `TaskCounts` は状態ごとのレコード数です。

use serde::Serialize;

use crate::domain::{TaskId, TaskRecord, TaskState};

/// Poll view of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: TaskState,
    /// Human-readable summary of `state`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

impl TaskStatus {
    /// Build the view. A missing record reads as PENDING.
    pub fn from_record(task_id: TaskId, record: Option<&TaskRecord>) -> Self {
        let state = record.map_or(TaskState::Pending, |r| r.state);
        let mut status = Self {
            task_id,
            state,
            status: Self::message(state).to_string(),
            result: None,
            error: None,
            info: None,
        };
        if let Some(record) = record {
            match state {
                TaskState::Success => status.result = record.result.clone(),
                TaskState::Failure => status.error = record.info.clone(),
                TaskState::Retry | TaskState::Revoked => status.info = record.info.clone(),
                _ => {}
            }
        }
        status
    }

    pub fn message(state: TaskState) -> &'static str {
        match state {
            TaskState::Pending => "Task is waiting to be executed",
            TaskState::Started => "Task is running",
            TaskState::Success => "Task completed successfully",
            TaskState::Failure => "Task failed",
            TaskState::Revoked => "Task cancelled",
            TaskState::Retry => "Task is being retried",
        }
    }
}

/// Number of records in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub started: usize,
    pub success: usize,
    pub failure: usize,
    pub retry: usize,
    pub revoked: usize,
}

impl TaskCounts {
    pub fn total(&self) -> usize {
        self.pending + self.started + self.success + self.failure + self.retry + self.revoked
    }

    /// Records that have not reached a terminal state.
    pub fn in_flight(&self) -> usize {
        self.pending + self.started + self.retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::{CANCELLED, CANCELLED_BEFORE_EXECUTION};
    use chrono::Utc;
    use rstest::rstest;
    use serde_json::json;
    use ulid::Ulid;

    fn record(state: TaskState) -> TaskRecord {
        let mut r = TaskRecord::new(TaskId::from_ulid(Ulid::new()), "report", 2, Utc::now());
        r.state = state;
        r
    }

    #[rstest]
    #[case(TaskState::Pending, "Task is waiting to be executed")]
    #[case(TaskState::Started, "Task is running")]
    #[case(TaskState::Success, "Task completed successfully")]
    #[case(TaskState::Failure, "Task failed")]
    #[case(TaskState::Revoked, "Task cancelled")]
    #[case(TaskState::Retry, "Task is being retried")]
    fn message_per_state(#[case] state: TaskState, #[case] message: &str) {
        let r = record(state);
        assert_eq!(TaskStatus::from_record(r.id, Some(&r)).status, message);
    }

    #[test]
    fn unknown_id_is_pending() {
        let id = TaskId::from_ulid(Ulid::new());
        let status = TaskStatus::from_record(id, None);
        assert_eq!(status.state, TaskState::Pending);
        assert!(status.result.is_none());
    }

    #[test]
    fn success_carries_result_only() {
        let mut r = record(TaskState::Started);
        r.mark_succeeded(json!({"pages": 3}), Utc::now());

        let json = serde_json::to_value(TaskStatus::from_record(r.id, Some(&r))).unwrap();
        assert_eq!(json["state"], "SUCCESS");
        assert_eq!(json["result"], json!({"pages": 3}));
        assert!(json.get("error").is_none());
        assert!(json.get("info").is_none());
    }

    #[test]
    fn failure_reports_info_as_error() {
        let mut r = record(TaskState::Started);
        r.mark_failed("smtp down", Utc::now());
        let status = TaskStatus::from_record(r.id, Some(&r));
        assert_eq!(status.error.as_deref(), Some("smtp down"));
        assert!(status.info.is_none());
    }

    #[rstest]
    #[case::before_dispatch(CANCELLED_BEFORE_EXECUTION)]
    #[case::after_run(CANCELLED)]
    fn revoked_keeps_the_cancel_reason(#[case] reason: &str) {
        let mut r = record(TaskState::Pending);
        r.mark_revoked(reason, Utc::now());

        let json = serde_json::to_value(TaskStatus::from_record(r.id, Some(&r))).unwrap();
        assert_eq!(json["status"], "Task cancelled");
        assert_eq!(json["info"], reason);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn counts_total_and_in_flight() {
        let counts = TaskCounts {
            pending: 1,
            started: 2,
            success: 3,
            failure: 1,
            retry: 1,
            revoked: 1,
        };
        assert_eq!(counts.total(), 9);
        assert_eq!(counts.in_flight(), 4);
    }
}
