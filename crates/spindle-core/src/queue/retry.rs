//! Retry policy: the retry budget and default backoff of a task definition.

use std::time::Duration;

use tracing::warn;

use crate::domain::RetryRequest;

/// Retry policy for a task definition.
///
/// The engine does not compute exponential backoff by itself: it honors the
/// countdown carried by a retry request, or falls back to
/// `default_retry_delay`. Task bodies that want exponential backoff pass
/// [`RetryPolicy::exponential`] as the countdown.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// How many retries a submission may consume.
    pub max_retries: u32,

    /// Delay used when a retry request has no countdown.
    pub default_retry_delay: Duration,

    /// Hard execution limit. Stored, NOT enforced.
    pub time_limit: Option<Duration>,

    /// Soft execution limit. Stored, NOT enforced.
    pub soft_time_limit: Option<Duration>,
}

impl RetryPolicy {
    /// No retries, no delay.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_retry_delay = delay;
        self
    }

    /// Attach execution time limits.
    ///
    /// The engine has no preemption, so these are carried for callers and
    /// logged at registration, never enforced.
    pub fn with_time_limits(mut self, hard: Option<Duration>, soft: Option<Duration>) -> Self {
        self.time_limit = hard;
        self.soft_time_limit = soft;
        self
    }

    /// Delay to wait before the attempt following `request`.
    pub fn delay_for(&self, request: &RetryRequest) -> Duration {
        request.countdown.unwrap_or(self.default_retry_delay)
    }

    /// `base * 2^retries`, saturating.
    ///
    /// Example with base=60s: retry 0 -> 60s, 1 -> 120s, 2 -> 240s.
    pub fn exponential(base: Duration, retries: u32) -> Duration {
        let factor = 1u32.checked_shl(retries).unwrap_or(u32::MAX);
        base.saturating_mul(factor)
    }

    /// Log limits that will not be enforced.
    pub(crate) fn warn_unenforced_limits(&self, task_name: &str) {
        if self.time_limit.is_some() || self.soft_time_limit.is_some() {
            warn!(
                task = task_name,
                time_limit = ?self.time_limit,
                soft_time_limit = ?self.soft_time_limit,
                "time limits are recorded but not enforced by the engine"
            );
        }
    }
}
