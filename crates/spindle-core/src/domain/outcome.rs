//! Outcome - タスク本体がエンジンに返す結果
//!
//! 本体は値を返すか、retry を要求するか、失敗します。retry は例外ではなく
//! ただの値 (`TaskError::Retry`) なので、エンジンはそれを `match` するだけです。

use std::fmt;
use std::time::Duration;

/// Result of one attempt of a task body.
pub type TaskResult = Result<serde_json::Value, TaskError>;

/// A request to run the task again after a delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRequest {
    /// Error that caused the retry (kept as the record's info).
    pub error: Option<String>,

    /// Explicit delay. `None` means the definition's default delay.
    pub countdown: Option<Duration>,
}

impl RetryRequest {
    pub fn new(error: Option<String>, countdown: Option<Duration>) -> Self {
        Self { error, countdown }
    }
}

impl fmt::Display for RetryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) => f.write_str(error),
            None => f.write_str("Retry requested"),
        }
    }
}

/// Error half of a task body's result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// Opt-in backoff: run again later, if the retry budget allows.
    #[error("retry requested: {0}")]
    Retry(RetryRequest),

    /// Anything else. Fails the task immediately, no retry.
    #[error("{0}")]
    Fatal(String),
}

impl TaskError {
    /// Retry with the definition's default delay.
    pub fn retry(error: impl fmt::Display) -> Self {
        TaskError::Retry(RetryRequest::new(Some(error.to_string()), None))
    }

    /// Retry after an explicit countdown.
    pub fn retry_in(error: impl fmt::Display, countdown: Duration) -> Self {
        TaskError::Retry(RetryRequest::new(Some(error.to_string()), Some(countdown)))
    }

    pub fn fatal(error: impl fmt::Display) -> Self {
        TaskError::Fatal(error.to_string())
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(e: serde_json::Error) -> Self {
        TaskError::Fatal(format!("json: {e}"))
    }
}
