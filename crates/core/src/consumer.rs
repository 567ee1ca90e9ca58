// Queue consumer
// Decision: Acknowledge per message, never per batch, so a failed re-enqueue only
// redelivers its own notification
// Decision: A batch-level failure acknowledges nothing; the visibility timeout redelivers it

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{BatchReport, EventDispatcher};
use crate::error::{ApiError, BatchError};
use crate::traits::MessageSource;

/// Maximum messages a single receive may return
pub const MAX_BATCH_SIZE: usize = 10;

/// Polling configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Messages requested per receive
    pub batch_size: usize,
    /// Pause after an empty receive
    pub idle_interval: Duration,
    /// Pause after a failed receive or batch
    pub error_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            idle_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl ConsumerConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }
}

/// Result of one receive-process-acknowledge cycle
#[derive(Debug)]
pub enum PollOutcome {
    /// Nothing was received
    Idle,
    Processed(BatchReport),
    /// Batch-level failure; nothing was acknowledged
    Failed(BatchError),
}

/// Receives batches from the queue and feeds them to the dispatcher
pub struct QueueConsumer {
    source: Arc<dyn MessageSource>,
    dispatcher: EventDispatcher,
    config: ConsumerConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl QueueConsumer {
    pub fn new(
        source: Arc<dyn MessageSource>,
        dispatcher: EventDispatcher,
        config: ConsumerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            source,
            dispatcher,
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Handle that stops [`run`](Self::run) after the batch in flight
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Run until shutdown is signaled
    pub async fn run(&self) {
        info!(batch_size = self.config.batch_size, "Starting queue consumer");
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, stopping consumer");
                break;
            }

            let pause = match self.poll_once().await {
                Ok(PollOutcome::Processed(_)) => None,
                Ok(PollOutcome::Idle) => Some(self.config.idle_interval),
                Ok(PollOutcome::Failed(_)) => Some(self.config.error_backoff),
                Err(e) => {
                    error!(error = %e, "Failed to receive messages");
                    Some(self.config.error_backoff)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shutdown_rx.changed() => {
                        info!("Shutdown during poll wait");
                        break;
                    }
                }
            }
        }

        info!("Queue consumer stopped");
    }

    /// Receive one batch, process it and acknowledge what may be deleted
    ///
    /// `Err` means the receive itself failed.
    pub async fn poll_once(&self) -> Result<PollOutcome, ApiError> {
        let messages = self.source.receive(self.config.batch_size).await?;
        if messages.is_empty() {
            return Ok(PollOutcome::Idle);
        }

        debug!(count = messages.len(), "Received messages");

        let report = match self.dispatcher.process_batch(&messages).await {
            Ok(report) => report,
            Err(e) => {
                error!(
                    error = %e,
                    count = messages.len(),
                    "Batch failed, leaving messages for redelivery"
                );
                return Ok(PollOutcome::Failed(e));
            }
        };

        let ack = report.acknowledgeable(&messages);
        if !ack.is_empty() {
            if let Err(e) = self.source.acknowledge(&ack).await {
                // Redelivery is harmless: every step is idempotent
                warn!(error = %e, count = ack.len(), "Failed to acknowledge messages");
            }
        }

        Ok(PollOutcome::Processed(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatcherConfig;
    use crate::memory::{InMemoryControlPlane, InMemoryLifecycleApi, InMemoryQueue};
    use crate::traits::ApiCredentials;
    use serde_json::json;

    struct Harness {
        control_plane: InMemoryControlPlane,
        queue: InMemoryQueue,
        consumer: QueueConsumer,
    }

    fn harness() -> Harness {
        let control_plane = InMemoryControlPlane::new();
        let lifecycle = InMemoryLifecycleApi::new();
        let queue = InMemoryQueue::new();
        let dispatcher = EventDispatcher::new(
            Arc::new(control_plane.clone()),
            Arc::new(lifecycle),
            Arc::new(queue.clone()),
            DispatcherConfig::new("pool-1", ApiCredentials::new("key", "secret")),
        );
        let consumer = QueueConsumer::new(
            Arc::new(queue.clone()),
            dispatcher,
            ConsumerConfig::default()
                .with_idle_interval(Duration::from_millis(10))
                .with_error_backoff(Duration::from_millis(10)),
        );
        Harness {
            control_plane,
            queue,
            consumer,
        }
    }

    fn body(instance_id: &str) -> String {
        json!({
            "EC2InstanceId": instance_id,
            "LifecycleHookName": "drain-hook",
            "AutoScalingGroupName": "workers-asg",
            "LifecycleActionToken": format!("token-{}", instance_id)
        })
        .to_string()
    }

    #[test]
    fn test_batch_size_is_clamped() {
        assert_eq!(ConsumerConfig::default().with_batch_size(0).batch_size, 1);
        assert_eq!(ConsumerConfig::default().with_batch_size(50).batch_size, 10);
        assert_eq!(ConsumerConfig::default().with_batch_size(4).batch_size, 4);
    }

    #[tokio::test]
    async fn test_poll_idle() {
        let h = harness();
        assert!(matches!(h.consumer.poll_once().await, Ok(PollOutcome::Idle)));
        assert!(h.control_plane.token_exchanges().await.is_empty());
    }

    #[tokio::test]
    async fn test_poll_acknowledges_processed_messages() {
        let h = harness();
        h.control_plane.add_instance_worker("w-1", "i-1").await;
        h.control_plane.add_instance_worker("w-2", "i-2").await;
        h.control_plane.set_busy("w-2", true).await;
        h.queue.push(body("i-1")).await;
        h.queue.push(body("i-2")).await;

        let outcome = h.consumer.poll_once().await.unwrap();
        let PollOutcome::Processed(report) = outcome else {
            panic!("expected a processed batch");
        };
        assert_eq!(report.done(), 1);
        assert_eq!(report.retrying(), 1);

        assert_eq!(
            h.queue.acknowledged().await,
            vec!["msg-1".to_string(), "msg-2".to_string()]
        );
        assert_eq!(h.queue.in_flight_len().await, 0);
    }

    #[tokio::test]
    async fn test_batch_failure_acknowledges_nothing() {
        let h = harness();
        h.control_plane
            .fail_token_exchange(ApiError::rejected("bad key"))
            .await;
        h.queue.push(body("i-1")).await;

        let outcome = h.consumer.poll_once().await.unwrap();
        assert!(matches!(
            outcome,
            PollOutcome::Failed(BatchError::Authentication(_))
        ));
        assert!(h.queue.acknowledged().await.is_empty());
        assert_eq!(h.queue.in_flight_len().await, 1);
    }

    #[tokio::test]
    async fn test_requeue_failure_leaves_message_in_flight() {
        let h = harness();
        h.control_plane.add_instance_worker("w-1", "i-1").await;
        h.control_plane.add_instance_worker("w-2", "i-2").await;
        h.control_plane.set_busy("w-1", true).await;
        h.queue
            .fail_enqueue(ApiError::transport("queue unavailable"))
            .await;
        h.queue.push(body("i-1")).await;
        h.queue.push(body("i-2")).await;

        let outcome = h.consumer.poll_once().await.unwrap();
        let PollOutcome::Processed(report) = outcome else {
            panic!("expected a processed batch");
        };
        assert_eq!(report.requeue_failed(), 1);
        assert_eq!(report.done(), 1);

        assert_eq!(h.queue.acknowledged().await, vec!["msg-2".to_string()]);
        assert_eq!(h.queue.in_flight_len().await, 1);
    }

    #[tokio::test]
    async fn test_acknowledge_failure_still_reports_batch() {
        let h = harness();
        h.control_plane.add_instance_worker("w-1", "i-1").await;
        h.queue
            .fail_acknowledge(ApiError::transport("delete throttled"))
            .await;
        h.queue.push(body("i-1")).await;

        let outcome = h.consumer.poll_once().await.unwrap();
        let PollOutcome::Processed(report) = outcome else {
            panic!("expected a processed batch");
        };
        assert_eq!(report.done(), 1);
        assert!(h.queue.acknowledged().await.is_empty());
        assert_eq!(h.queue.in_flight_len().await, 1);

        // Redelivery after the visibility timeout is drained again and acknowledged
        h.queue.clear_failures().await;
        h.queue.expire_in_flight().await;
        let outcome = h.consumer.poll_once().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Processed(ref r) if r.done() == 1));
        assert_eq!(h.queue.acknowledged().await, vec!["msg-1".to_string()]);
        assert_eq!(h.queue.in_flight_len().await, 0);
        assert_eq!(h.control_plane.drain_requests().await.len(), 2);
    }

    #[tokio::test]
    async fn test_receive_error_is_returned() {
        let h = harness();
        h.queue.fail_receive(ApiError::transport("throttled")).await;

        let err = h.consumer.poll_once().await.unwrap_err();
        assert_eq!(err, ApiError::transport("throttled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let h = harness();
        h.control_plane.add_instance_worker("w-1", "i-1").await;
        h.queue.push(body("i-1")).await;

        let consumer = Arc::new(h.consumer);
        let shutdown = consumer.shutdown_handle();
        let running = tokio::spawn({
            let consumer = consumer.clone();
            async move { consumer.run().await }
        });

        // Let the consumer drain the queue and go idle
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.send(true).unwrap();
        running.await.unwrap();

        assert_eq!(h.queue.acknowledged().await, vec!["msg-1".to_string()]);
    }
}
