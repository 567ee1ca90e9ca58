//! Retry policy and scheduling
//!
//! Waiting is delegated to the queue: a failed notification is re-enqueued as a
//! new message with a delivery delay, and the attempt count travels in the body.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::notification::TerminationNotification;
use crate::traits::NotificationQueue;

/// Longest delivery delay the queue accepts
pub const MAX_QUEUE_DELAY_SECONDS: u32 = 15 * 60;

/// Retry bookkeeping embedded in a notification once it has failed at least once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    /// Seconds to wait before the next delivery
    #[serde(rename = "delaySeconds", alias = "delay_seconds")]
    pub delay_seconds: u32,

    /// Retries already performed (1-based)
    #[serde(rename = "retry")]
    pub attempt: u32,
}

impl RetryState {
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "delaySeconds": self.delay_seconds,
            "retry": self.attempt,
        })
    }
}

/// What to do with a notification that failed again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue with this state
    Requeue(RetryState),
    /// Ceiling reached; the notification is dropped for good
    Exhausted(RetryState),
}

/// Exponential backoff with a delay cap and an attempt ceiling
///
/// # Example
///
/// ```
/// use drainer_core::retry::{RetryDecision, RetryPolicy, RetryState};
///
/// let policy = RetryPolicy::default();
/// let first = policy.next(None);
/// assert_eq!(first, RetryDecision::Requeue(RetryState { delay_seconds: 2, attempt: 1 }));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay for the first retry
    pub initial_delay_seconds: u32,

    /// Upper bound on the delay; never above [`MAX_QUEUE_DELAY_SECONDS`]
    pub max_delay_seconds: u32,

    /// Attempt number at which the notification is dropped instead of re-enqueued
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    /// 2s, doubling, capped at 15 minutes, dropped at attempt 30 (about 45 minutes total)
    fn default() -> Self {
        Self {
            initial_delay_seconds: 2,
            max_delay_seconds: MAX_QUEUE_DELAY_SECONDS,
            max_attempts: 30,
        }
    }
}

impl RetryPolicy {
    /// Set the delay for the first retry
    pub fn with_initial_delay(mut self, seconds: u32) -> Self {
        self.initial_delay_seconds = seconds.max(1);
        self
    }

    /// Set the delay cap
    pub fn with_max_delay(mut self, seconds: u32) -> Self {
        self.max_delay_seconds = seconds.min(MAX_QUEUE_DELAY_SECONDS);
        self
    }

    /// Set the attempt ceiling
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Compute the retry state that follows `previous`
    pub fn next(&self, previous: Option<&RetryState>) -> RetryDecision {
        let cap = self.max_delay_seconds.min(MAX_QUEUE_DELAY_SECONDS);
        let floor = self.initial_delay_seconds.min(cap);

        let state = match previous {
            None => RetryState {
                delay_seconds: floor,
                attempt: 1,
            },
            Some(prev) => RetryState {
                delay_seconds: prev.delay_seconds.saturating_mul(2).clamp(floor, cap),
                attempt: prev.attempt.saturating_add(1),
            },
        };

        if state.attempt >= self.max_attempts {
            RetryDecision::Exhausted(state)
        } else {
            RetryDecision::Requeue(state)
        }
    }
}

/// Outcome of [`RetryScheduler::schedule`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Requeued(RetryState),
    Exhausted(RetryState),
    /// The queue refused the new message; the original delivery must not be acknowledged
    EnqueueFailed { retry: RetryState, error: ApiError },
}

/// Re-enqueues failed notifications with backoff
#[derive(Clone)]
pub struct RetryScheduler {
    queue: Arc<dyn NotificationQueue>,
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(queue: Arc<dyn NotificationQueue>, policy: RetryPolicy) -> Self {
        Self { queue, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Emit a new, delayed copy of `notification`, or drop it once the ceiling is hit
    pub async fn schedule(&self, notification: &TerminationNotification) -> ScheduleOutcome {
        let instance_id = notification.instance_id();

        let retry = match self.policy.next(notification.retry()) {
            RetryDecision::Exhausted(retry) => {
                warn!(
                    instance_id = %instance_id,
                    attempt = retry.attempt,
                    "Max retries reached, dropping notification"
                );
                return ScheduleOutcome::Exhausted(retry);
            }
            RetryDecision::Requeue(retry) => retry,
        };

        let body = notification.to_retry_body(&retry);
        match self.queue.enqueue(body, retry.delay_seconds).await {
            Ok(()) => {
                info!(
                    instance_id = %instance_id,
                    attempt = retry.attempt,
                    delay_seconds = retry.delay_seconds,
                    "Retrying notification"
                );
                ScheduleOutcome::Requeued(retry)
            }
            Err(error) => {
                warn!(
                    instance_id = %instance_id,
                    attempt = retry.attempt,
                    error = %error,
                    "Failed to re-enqueue notification, leaving delivery unacknowledged"
                );
                ScheduleOutcome::EnqueueFailed { retry, error }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryQueue;
    use crate::notification::ParsedNotification;
    use serde_json::json;

    fn state(delay_seconds: u32, attempt: u32) -> RetryState {
        RetryState {
            delay_seconds,
            attempt,
        }
    }

    fn notification(retry: Option<Value>) -> TerminationNotification {
        let mut body = json!({
            "EC2InstanceId": "i-1",
            "LifecycleHookName": "drain-hook",
            "AutoScalingGroupName": "workers-asg",
            "LifecycleActionToken": "token-1"
        });
        if let Some(retry) = retry {
            body["retry"] = retry;
        }
        match TerminationNotification::from_value(body).unwrap() {
            ParsedNotification::Termination(n) => n,
            ParsedNotification::Test => panic!("expected a termination notification"),
        }
    }

    #[test]
    fn test_first_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next(None), RetryDecision::Requeue(state(2, 1)));
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let policy = RetryPolicy::default();

        let mut previous: Option<RetryState> = None;
        let mut delays = Vec::new();
        for _ in 0..12 {
            match policy.next(previous.as_ref()) {
                RetryDecision::Requeue(next) => {
                    delays.push(next.delay_seconds);
                    previous = Some(next);
                }
                RetryDecision::Exhausted(_) => panic!("exhausted too early"),
            }
        }

        assert_eq!(
            delays,
            vec![2, 4, 8, 16, 32, 64, 128, 256, 512, 900, 900, 900]
        );
    }

    #[test]
    fn test_exhausted_exactly_at_attempt_thirty() {
        let policy = RetryPolicy::default();

        let mut previous: Option<RetryState> = None;
        let mut requeued = 0;
        loop {
            match policy.next(previous.as_ref()) {
                RetryDecision::Requeue(next) => {
                    requeued += 1;
                    previous = Some(next);
                }
                RetryDecision::Exhausted(last) => {
                    assert_eq!(last.attempt, 30);
                    assert_eq!(last.delay_seconds, 900);
                    break;
                }
            }
        }

        assert_eq!(requeued, 29);
    }

    #[test]
    fn test_state_at_ceiling_minus_one_is_exhausted() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.next(Some(&state(900, 29))),
            RetryDecision::Exhausted(state(900, 30))
        );
        assert_eq!(
            policy.next(Some(&state(900, 28))),
            RetryDecision::Requeue(state(900, 29))
        );
    }

    #[test]
    fn test_out_of_range_previous_delays_are_clamped() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.next(Some(&state(0, 3))),
            RetryDecision::Requeue(state(2, 4))
        );
        assert_eq!(
            policy.next(Some(&state(u32::MAX, 3))),
            RetryDecision::Requeue(state(900, 4))
        );
    }

    #[test]
    fn test_builder_clamps_to_queue_limit() {
        let policy = RetryPolicy::default()
            .with_initial_delay(5)
            .with_max_delay(3600)
            .with_max_attempts(3);

        assert_eq!(policy.max_delay_seconds, MAX_QUEUE_DELAY_SECONDS);
        assert_eq!(policy.next(None), RetryDecision::Requeue(state(5, 1)));
        assert_eq!(
            policy.next(Some(&state(5, 2))),
            RetryDecision::Exhausted(state(10, 3))
        );
    }

    #[test]
    fn test_retry_state_wire_format() {
        let encoded = serde_json::to_value(state(8, 3)).unwrap();
        assert_eq!(encoded, json!({ "delaySeconds": 8, "retry": 3 }));
        assert_eq!(state(8, 3).to_json(), encoded);
    }

    #[tokio::test]
    async fn test_schedule_enqueues_with_delay() {
        let queue = InMemoryQueue::new();
        let scheduler = RetryScheduler::new(Arc::new(queue.clone()), RetryPolicy::default());

        let outcome = scheduler
            .schedule(&notification(Some(json!({ "delaySeconds": 4, "retry": 2 }))))
            .await;
        assert_eq!(outcome, ScheduleOutcome::Requeued(state(8, 3)));

        let sent = queue.enqueued().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].delay_seconds, 8);
        let body: Value = serde_json::from_str(&sent[0].body).unwrap();
        assert_eq!(body["retry"], json!({ "delaySeconds": 8, "retry": 3 }));
        assert_eq!(body["EC2InstanceId"], "i-1");
    }

    #[tokio::test]
    async fn test_schedule_drops_when_exhausted() {
        let queue = InMemoryQueue::new();
        let scheduler = RetryScheduler::new(Arc::new(queue.clone()), RetryPolicy::default());

        let outcome = scheduler
            .schedule(&notification(Some(json!({ "delaySeconds": 900, "retry": 29 }))))
            .await;

        assert_eq!(outcome, ScheduleOutcome::Exhausted(state(900, 30)));
        assert!(queue.enqueued().await.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_reports_enqueue_failure() {
        let queue = InMemoryQueue::new();
        queue.fail_enqueue(ApiError::transport("queue unavailable")).await;
        let scheduler = RetryScheduler::new(Arc::new(queue.clone()), RetryPolicy::default());

        let outcome = scheduler.schedule(&notification(None)).await;

        assert_eq!(
            outcome,
            ScheduleOutcome::EnqueueFailed {
                retry: state(2, 1),
                error: ApiError::transport("queue unavailable"),
            }
        );
        assert!(queue.enqueued().await.is_empty());
    }
}
