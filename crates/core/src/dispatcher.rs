//! Batch dispatcher
//!
//! For each batch: one session token, one worker directory, then every notification
//! in order through
//!
//! ```text
//! Received -> Validated -> Resolved -> Draining -> Releasing -> Done
//!     |           |                        |            |
//!     +-----------+--> Dropped             +------------+--> Retrying (or Dropped at the ceiling)
//! ```
//!
//! Token and directory failures abort the batch before any notification is looked at.
//! Everything after that is decided per notification and never aborts its siblings.

use std::sync::Arc;

use tracing::{debug, field, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::directory::WorkerDirectory;
use crate::drain::{DrainCoordinator, DrainOutcome};
use crate::error::{ApiError, BatchError};
use crate::notification::{MalformedNotification, ParsedNotification, TerminationNotification};
use crate::release::{LifecycleReleaser, ReleaseOutcome};
use crate::retry::{RetryPolicy, RetryScheduler, RetryState, ScheduleOutcome};
use crate::session::SessionProvider;
use crate::traits::{
    ApiCredentials, ControlPlane, LifecycleApi, NotificationQueue, QueueMessage, SessionToken,
};

/// Why a notification was dropped without retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Auto Scaling heartbeat
    TestNotification,
    Malformed(MalformedNotification),
    /// No worker in the pool runs on this instance
    UnresolvedInstance,
    /// Retry ceiling reached
    RetryExhausted { attempt: u32, cause: RetryCause },
}

/// Why a notification needs another attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryCause {
    DrainBusy,
    DrainFailed(ApiError),
    ReleaseRejected(String),
    ReleaseFailed(ApiError),
}

/// Terminal state of one notification within a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Drained and released
    Done,
    /// A delayed copy was enqueued
    Retrying { cause: RetryCause, retry: RetryState },
    Dropped(DropReason),
    /// A retry was due but the queue refused it; the delivery must be redelivered
    RequeueFailed { cause: RetryCause, error: ApiError },
}

impl Disposition {
    /// Whether the delivery that produced this disposition may be deleted
    pub fn acknowledges(&self) -> bool {
        !matches!(self, Disposition::RequeueFailed { .. })
    }
}

/// What happened to one queue message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationReport {
    pub message_id: String,
    pub instance_id: Option<String>,
    pub worker_id: Option<String>,
    pub disposition: Disposition,
}

/// Per-message results of a processed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub notifications: Vec<NotificationReport>,
}

impl BatchReport {
    pub fn done(&self) -> usize {
        self.count(|d| matches!(d, Disposition::Done))
    }

    pub fn retrying(&self) -> usize {
        self.count(|d| matches!(d, Disposition::Retrying { .. }))
    }

    pub fn dropped(&self) -> usize {
        self.count(|d| matches!(d, Disposition::Dropped(_)))
    }

    pub fn requeue_failed(&self) -> usize {
        self.count(|d| matches!(d, Disposition::RequeueFailed { .. }))
    }

    /// The subset of `messages` that may be deleted from the queue
    ///
    /// `messages` must be the batch this report was produced from. Reports are matched
    /// to deliveries by position, since message ids are not guaranteed unique.
    pub fn acknowledgeable(&self, messages: &[QueueMessage]) -> Vec<QueueMessage> {
        messages
            .iter()
            .zip(&self.notifications)
            .filter(|(_, n)| n.disposition.acknowledges())
            .map(|(m, _)| m.clone())
            .collect()
    }

    fn count(&self, pred: impl Fn(&Disposition) -> bool) -> usize {
        self.notifications
            .iter()
            .filter(|n| pred(&n.disposition))
            .count()
    }
}

/// Read-only state shared by every notification in one batch
#[derive(Debug)]
pub struct BatchContext {
    pub batch_id: Uuid,
    pub token: SessionToken,
    pub directory: WorkerDirectory,
}

/// Settings for [`EventDispatcher`]
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub pool_id: String,
    pub credentials: ApiCredentials,
    pub retry_policy: RetryPolicy,
}

impl DispatcherConfig {
    pub fn new(pool_id: impl Into<String>, credentials: ApiCredentials) -> Self {
        Self {
            pool_id: pool_id.into(),
            credentials,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Sequences directory lookup, drain, release and retry for each notification
#[derive(Clone)]
pub struct EventDispatcher {
    control_plane: Arc<dyn ControlPlane>,
    sessions: SessionProvider,
    drain: DrainCoordinator,
    releaser: LifecycleReleaser,
    retry: RetryScheduler,
}

impl EventDispatcher {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        lifecycle: Arc<dyn LifecycleApi>,
        queue: Arc<dyn NotificationQueue>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            sessions: SessionProvider::new(control_plane.clone(), config.credentials),
            drain: DrainCoordinator::new(control_plane.clone(), config.pool_id),
            releaser: LifecycleReleaser::new(lifecycle),
            retry: RetryScheduler::new(queue, config.retry_policy),
            control_plane,
        }
    }

    /// Process one batch of queue messages, strictly in order
    ///
    /// Returns `Err` only for batch-level failures; the caller must then leave every
    /// message for redelivery.
    pub async fn process_batch(
        &self,
        messages: &[QueueMessage],
    ) -> Result<BatchReport, BatchError> {
        let batch_id = Uuid::now_v7();
        let span = info_span!("batch", batch_id = %batch_id, size = messages.len());
        self.run_batch(batch_id, messages).instrument(span).await
    }

    /// Acquire the batch-wide token and directory
    pub async fn prepare(&self, batch_id: Uuid) -> Result<BatchContext, BatchError> {
        let token = self.sessions.acquire().await?;
        let directory =
            WorkerDirectory::load(self.control_plane.as_ref(), self.drain.pool_id(), &token)
                .await?;
        Ok(BatchContext {
            batch_id,
            token,
            directory,
        })
    }

    async fn run_batch(
        &self,
        batch_id: Uuid,
        messages: &[QueueMessage],
    ) -> Result<BatchReport, BatchError> {
        if messages.is_empty() {
            return Ok(BatchReport {
                batch_id,
                notifications: Vec::new(),
            });
        }

        debug!(
            message_ids = ?messages.iter().map(|m| m.message_id.as_str()).collect::<Vec<_>>(),
            "Processing batch"
        );

        let ctx = self.prepare(batch_id).await?;

        let mut notifications = Vec::with_capacity(messages.len());
        for message in messages {
            let span = info_span!(
                "notification",
                message_id = %message.message_id,
                instance_id = field::Empty,
                worker_id = field::Empty
            );
            notifications.push(self.handle(&ctx, message).instrument(span).await);
        }

        let report = BatchReport {
            batch_id,
            notifications,
        };
        info!(
            done = report.done(),
            retrying = report.retrying(),
            dropped = report.dropped(),
            requeue_failed = report.requeue_failed(),
            "Batch processed"
        );
        Ok(report)
    }

    /// Drive a single notification to its terminal state
    pub async fn handle(&self, ctx: &BatchContext, message: &QueueMessage) -> NotificationReport {
        let mut report = NotificationReport {
            message_id: message.message_id.clone(),
            instance_id: None,
            worker_id: None,
            disposition: Disposition::Done,
        };

        let notification = match TerminationNotification::parse(&message.body) {
            Ok(ParsedNotification::Termination(notification)) => notification,
            Ok(ParsedNotification::Test) => {
                info!("Received test notification, skipping");
                report.disposition = Disposition::Dropped(DropReason::TestNotification);
                return report;
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed notification");
                report.disposition = Disposition::Dropped(DropReason::Malformed(e));
                return report;
            }
        };

        let instance_id = notification.instance_id();
        Span::current().record("instance_id", instance_id);
        report.instance_id = Some(instance_id.to_string());

        let Some(worker_id) = ctx.directory.lookup(instance_id) else {
            warn!(instance_id = %instance_id, "No worker found for instance, dropping notification");
            report.disposition = Disposition::Dropped(DropReason::UnresolvedInstance);
            return report;
        };
        Span::current().record("worker_id", worker_id);
        report.worker_id = Some(worker_id.to_string());

        let cause = match self.drain.drain(worker_id, &ctx.token).await {
            DrainOutcome::Drained => match self.releaser.release(notification.action()).await {
                ReleaseOutcome::Released => {
                    info!(
                        instance_id = %instance_id,
                        worker_id = %worker_id,
                        "Worker drained and instance released"
                    );
                    return report;
                }
                ReleaseOutcome::Rejected(reason) => RetryCause::ReleaseRejected(reason),
                ReleaseOutcome::Failed(error) => RetryCause::ReleaseFailed(error),
            },
            DrainOutcome::StillBusy => RetryCause::DrainBusy,
            DrainOutcome::Failed(error) => RetryCause::DrainFailed(error),
        };

        report.disposition = match self.retry.schedule(&notification).await {
            ScheduleOutcome::Requeued(retry) => Disposition::Retrying { cause, retry },
            ScheduleOutcome::Exhausted(retry) => Disposition::Dropped(DropReason::RetryExhausted {
                attempt: retry.attempt,
                cause,
            }),
            ScheduleOutcome::EnqueueFailed { error, .. } => {
                Disposition::RequeueFailed { cause, error }
            }
        };
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(message_id: &str, disposition: Disposition) -> NotificationReport {
        NotificationReport {
            message_id: message_id.to_string(),
            instance_id: None,
            worker_id: None,
            disposition,
        }
    }

    fn message(id: &str) -> QueueMessage {
        QueueMessage {
            message_id: id.to_string(),
            receipt_handle: format!("rh-{}", id),
            body: "{}".to_string(),
        }
    }

    #[test]
    fn test_requeue_failure_is_not_acknowledged() {
        let failed = Disposition::RequeueFailed {
            cause: RetryCause::DrainBusy,
            error: ApiError::transport("down"),
        };
        assert!(!failed.acknowledges());
        assert!(Disposition::Done.acknowledges());
        assert!(Disposition::Dropped(DropReason::UnresolvedInstance).acknowledges());
        assert!(Disposition::Retrying {
            cause: RetryCause::DrainBusy,
            retry: RetryState {
                delay_seconds: 2,
                attempt: 1
            },
        }
        .acknowledges());
    }

    #[test]
    fn test_report_counts_and_acknowledgeable() {
        let batch = BatchReport {
            batch_id: Uuid::now_v7(),
            notifications: vec![
                report("a", Disposition::Done),
                report("b", Disposition::Dropped(DropReason::TestNotification)),
                report(
                    "c",
                    Disposition::RequeueFailed {
                        cause: RetryCause::ReleaseFailed(ApiError::transport("timeout")),
                        error: ApiError::transport("down"),
                    },
                ),
                report(
                    "d",
                    Disposition::Retrying {
                        cause: RetryCause::DrainBusy,
                        retry: RetryState {
                            delay_seconds: 4,
                            attempt: 2,
                        },
                    },
                ),
            ],
        };

        assert_eq!(batch.done(), 1);
        assert_eq!(batch.dropped(), 1);
        assert_eq!(batch.requeue_failed(), 1);
        assert_eq!(batch.retrying(), 1);

        let messages = vec![message("a"), message("b"), message("c"), message("d")];
        let ack: Vec<_> = batch
            .acknowledgeable(&messages)
            .into_iter()
            .map(|m| m.message_id)
            .collect();
        assert_eq!(ack, vec!["a", "b", "d"]);
    }

    #[test]
    fn test_acknowledgeable_matches_by_position_not_id() {
        let batch = BatchReport {
            batch_id: Uuid::now_v7(),
            notifications: vec![
                report(
                    "",
                    Disposition::RequeueFailed {
                        cause: RetryCause::DrainBusy,
                        error: ApiError::transport("down"),
                    },
                ),
                report("", Disposition::Dropped(DropReason::TestNotification)),
            ],
        };

        let messages = vec![
            QueueMessage {
                message_id: String::new(),
                receipt_handle: "rh-a".to_string(),
                body: "{}".to_string(),
            },
            QueueMessage {
                message_id: String::new(),
                receipt_handle: "rh-b".to_string(),
                body: "{}".to_string(),
            },
        ];
        let ack: Vec<_> = batch
            .acknowledgeable(&messages)
            .into_iter()
            .map(|m| m.receipt_handle)
            .collect();
        assert_eq!(ack, vec!["rh-b"]);
    }
}
