use async_trait::async_trait;
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client;
use drainer_core::retry::MAX_QUEUE_DELAY_SECONDS;
use drainer_core::{ApiResult, MessageSource, NotificationQueue, QueueMessage};
use tracing::{debug, warn};

use super::sdk_error;

/// SQS queue used both as the notification source and as the retry timer
#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
    wait_seconds: u32,
}

impl SqsQueue {
    pub fn new(client: Client, queue_url: impl Into<String>, wait_seconds: u32) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            wait_seconds,
        }
    }
}

fn to_queue_message(message: Message) -> Option<QueueMessage> {
    let (Some(message_id), Some(receipt_handle)) = (message.message_id, message.receipt_handle)
    else {
        warn!("Received message without id or receipt handle, skipping");
        return None;
    };
    Some(QueueMessage {
        message_id,
        receipt_handle,
        body: message.body.unwrap_or_default(),
    })
}

#[async_trait]
impl NotificationQueue for SqsQueue {
    async fn enqueue(&self, body: String, delay_seconds: u32) -> ApiResult<()> {
        let delay = delay_seconds.min(MAX_QUEUE_DELAY_SECONDS) as i32;
        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .delay_seconds(delay)
            .send()
            .await
            .map_err(sdk_error)?;
        debug!(message_id = ?output.message_id, delay_seconds = delay, "Enqueued message");
        Ok(())
    }
}

#[async_trait]
impl MessageSource for SqsQueue {
    async fn receive(&self, max: usize) -> ApiResult<Vec<QueueMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max.clamp(1, 10) as i32)
            .wait_time_seconds(self.wait_seconds.min(20) as i32)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(to_queue_message)
            .collect())
    }

    async fn acknowledge(&self, messages: &[QueueMessage]) -> ApiResult<()> {
        let mut first_error = None;
        for message in messages {
            let result = self
                .client
                .delete_message()
                .queue_url(&self.queue_url)
                .receipt_handle(&message.receipt_handle)
                .send()
                .await;
            if let Err(e) = result {
                let error = sdk_error(e);
                warn!(message_id = %message.message_id, error = %error, "Failed to delete message");
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
