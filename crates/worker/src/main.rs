use std::sync::Arc;

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use drainer_core::telemetry::{init_telemetry, TelemetryConfig};
use drainer_core::{
    ApiCredentials, ConsumerConfig, DispatcherConfig, EventDispatcher, QueueConsumer, SecretStore,
};
use drainer_worker::{
    AutoScalingLifecycle, GraphQlControlPlane, SqsQueue, SsmSecretStore, WorkerConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; the real environment wins
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - SERVICE_NAME: Service name (default: "drainer-worker")
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "info")
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.service_name == "drainer" {
        telemetry_config.service_name = "drainer-worker".to_string();
    }
    init_telemetry(telemetry_config);

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    tracing::info!(
        endpoint = %config.control_plane_endpoint,
        worker_pool_id = %config.worker_pool_id,
        queue_url = %config.queue_url,
        batch_size = config.batch_size,
        "Starting drainer worker"
    );

    let aws = aws_config::load_defaults(BehaviorVersion::latest()).await;

    let secret = SsmSecretStore::new(aws_sdk_ssm::Client::new(&aws))
        .fetch_secret(&config.api_key_secret_name)
        .await
        .with_context(|| {
            format!(
                "Failed to read API key secret from {}",
                config.api_key_secret_name
            )
        })?;

    let control_plane =
        GraphQlControlPlane::new(&config.control_plane_endpoint, config.http_timeout)
            .context("Failed to build control plane client")?;
    let lifecycle = AutoScalingLifecycle::new(aws_sdk_autoscaling::Client::new(&aws));
    let queue = Arc::new(SqsQueue::new(
        aws_sdk_sqs::Client::new(&aws),
        config.queue_url.clone(),
        config.wait_seconds,
    ));

    let dispatcher = EventDispatcher::new(
        Arc::new(control_plane),
        Arc::new(lifecycle),
        queue.clone(),
        DispatcherConfig::new(
            config.worker_pool_id.clone(),
            ApiCredentials::new(config.api_key_id.clone(), secret),
        ),
    );

    // Long polling already waits on the queue, so an empty receive needs no extra pause
    let consumer_config = ConsumerConfig::default()
        .with_batch_size(config.batch_size)
        .with_idle_interval(if config.wait_seconds > 0 {
            std::time::Duration::ZERO
        } else {
            ConsumerConfig::default().idle_interval
        });
    let consumer = QueueConsumer::new(queue, dispatcher, consumer_config);

    // Finish the batch in flight before exiting
    let shutdown = consumer.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            let _ = shutdown.send(true);
        }
    });

    consumer.run().await;

    tracing::info!("Worker shutdown complete");
    Ok(())
}
