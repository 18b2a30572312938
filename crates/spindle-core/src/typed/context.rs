//! TaskContext - bound task に渡される実行コンテキスト
//!
//! 試行ごとに新しく作られます。retry の予算と現在の試行回数を公開し、
//! `retry()` で backoff を要求できます。

use std::fmt;
use std::time::Duration;

use crate::app::TaskHandle;
use crate::domain::{RetryRequest, SpindleError, TaskError, TaskId};
use crate::queue::WeakEngine;

/// Execution context of one attempt of a bound task.
#[derive(Clone)]
pub struct TaskContext {
    task_id: TaskId,
    retries: u32,
    max_retries: u32,
    default_retry_delay: Duration,
    engine: WeakEngine,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: TaskId,
        retries: u32,
        max_retries: u32,
        default_retry_delay: Duration,
        engine: WeakEngine,
    ) -> Self {
        Self {
            task_id,
            retries,
            max_retries,
            default_retry_delay,
            engine,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Retries consumed before this attempt.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn default_retry_delay(&self) -> Duration {
        self.default_retry_delay
    }

    /// Build the error to return from the body to request a retry.
    ///
    /// Once the budget is spent this returns a plain `Fatal` carrying
    /// `error`, so the task fails instead of rescheduling.
    pub fn retry(&self, error: impl fmt::Display, countdown: Option<Duration>) -> TaskError {
        if self.retries >= self.max_retries {
            return TaskError::Fatal(error.to_string());
        }
        let countdown = countdown.unwrap_or(self.default_retry_delay);
        TaskError::Retry(RetryRequest::new(Some(error.to_string()), Some(countdown)))
    }

    /// Enqueue a follow-up task by name.
    pub async fn submit(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<TaskHandle, SpindleError> {
        let engine = self.engine.upgrade().ok_or(SpindleError::ShutDown)?;
        engine.submit_by_name(name, args).await
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("retries", &self.retries)
            .field("max_retries", &self.max_retries)
            .field("default_retry_delay", &self.default_retry_delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn ctx(retries: u32, max_retries: u32) -> TaskContext {
        TaskContext::new(
            TaskId::from_ulid(Ulid::new()),
            retries,
            max_retries,
            Duration::from_secs(60),
            WeakEngine::default(),
        )
    }

    #[test]
    fn retry_within_budget_uses_default_delay() {
        let err = ctx(0, 3).retry("smtp down", None);
        assert_eq!(
            err,
            TaskError::Retry(RetryRequest::new(
                Some("smtp down".to_string()),
                Some(Duration::from_secs(60))
            ))
        );
    }

    #[test]
    fn retry_honors_explicit_countdown() {
        let err = ctx(1, 3).retry("smtp down", Some(Duration::from_secs(240)));
        assert!(matches!(
            err,
            TaskError::Retry(RetryRequest { countdown: Some(d), .. }) if d == Duration::from_secs(240)
        ));
    }

    #[test]
    fn retry_is_refused_once_budget_is_spent() {
        let err = ctx(3, 3).retry("smtp down", None);
        assert_eq!(err, TaskError::Fatal("smtp down".to_string()));
    }

    #[tokio::test]
    async fn submit_without_engine_reports_shutdown() {
        let err = ctx(0, 0)
            .submit("anything", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SpindleError::ShutDown));
    }
}
