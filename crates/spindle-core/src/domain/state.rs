//! TaskState - タスクの状態遷移

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a single task execution.
///
/// State transitions:
/// - Pending -> Started -> Success
/// - Pending -> Started -> Retry -> Started (loop while the retry budget lasts)
/// - Pending -> Started -> Retry -> Failure (budget exhausted)
/// - Pending -> Started -> Failure (unhandled error)
/// - Pending | Retry -> Revoked (cancelled before the body ran)
/// - Started -> Revoked (cancel observed at the success/retry checkpoint)
///
/// `Retry` is transient: the record sits on the delayed heap until its next
/// attempt starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Submitted, waiting for a worker.
    Pending,

    /// A worker is executing the body.
    Started,

    /// Body returned normally.
    Success,

    /// Unhandled error, or retry budget exhausted.
    Failure,

    /// Waiting out a backoff delay before the next attempt.
    Retry,

    /// Cancelled.
    Revoked,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Revoked
        )
    }

    /// States a caller is allowed to cancel from the status API.
    pub fn is_cancellable(self) -> bool {
        matches!(self, TaskState::Pending | TaskState::Started)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Started => "STARTED",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
            TaskState::Retry => "RETRY",
            TaskState::Revoked => "REVOKED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::pending(TaskState::Pending, false)]
    #[case::started(TaskState::Started, false)]
    #[case::retry(TaskState::Retry, false)]
    #[case::success(TaskState::Success, true)]
    #[case::failure(TaskState::Failure, true)]
    #[case::revoked(TaskState::Revoked, true)]
    fn terminal_states(#[case] state: TaskState, #[case] terminal: bool) {
        assert_eq!(state.is_terminal(), terminal);
    }

    #[test]
    fn only_pending_and_started_are_cancellable() {
        assert!(TaskState::Pending.is_cancellable());
        assert!(TaskState::Started.is_cancellable());
        assert!(!TaskState::Retry.is_cancellable());
        assert!(!TaskState::Success.is_cancellable());
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        let s = serde_json::to_string(&TaskState::Revoked).unwrap();
        assert_eq!(s, "\"REVOKED\"");
        assert_eq!(TaskState::Retry.to_string(), "RETRY");
    }
}
