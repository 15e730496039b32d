//! Amazon SQS implementation of [`QueueTransport`].
//!
//! Handlers may listen on queues in different regions, so one SDK client is
//! built per distinct region when the transport connects.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::Client;
use tracing::{debug, info};

use super::{QueueBinding, QueueTransport, RawMessage};
use crate::error::TransportError;

/// SQS caps a single receive at ten messages.
pub const SQS_MAX_MESSAGES: u32 = 10;

/// SQS caps long polling at twenty seconds.
pub const SQS_MAX_WAIT: Duration = Duration::from_secs(20);

/// Queue transport backed by the AWS SDK.
pub struct SqsTransport {
    clients: HashMap<String, Client>,
}

impl SqsTransport {
    /// Builds one client per region using the default credential chain.
    pub async fn connect<I, S>(regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut clients = HashMap::new();
        for region in regions {
            let region = region.into();
            if clients.contains_key(&region) {
                continue;
            }

            let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(region.clone()))
                .load()
                .await;
            info!(region = %region, "Created SQS client");
            clients.insert(region, Client::new(&sdk_config));
        }

        Self { clients }
    }

    /// Wraps already-built clients, keyed by region.
    pub fn with_clients(clients: HashMap<String, Client>) -> Self {
        Self { clients }
    }

    fn client(&self, region: &str) -> Result<&Client, TransportError> {
        self.clients
            .get(region)
            .ok_or_else(|| TransportError::UnknownRegion(region.to_string()))
    }
}

#[async_trait]
impl QueueTransport for SqsTransport {
    async fn receive(
        &self,
        queue: &QueueBinding,
        wait: Duration,
        max_messages: u32,
    ) -> Result<Vec<RawMessage>, TransportError> {
        let client = self.client(&queue.region)?;
        let wait_secs = wait.min(SQS_MAX_WAIT).as_secs() as i32;
        let max_messages = max_messages.clamp(1, SQS_MAX_MESSAGES) as i32;

        let output = client
            .receive_message()
            .queue_url(&queue.queue_url)
            .wait_time_seconds(wait_secs)
            .max_number_of_messages(max_messages)
            .send()
            .await
            .map_err(|e| TransportError::ReceiveFailed {
                queue_url: queue.queue_url.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let messages: Vec<RawMessage> = output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|message| {
                let receipt_handle = message.receipt_handle?;
                Some(RawMessage {
                    message_id: message.message_id,
                    receipt_handle,
                    body: message.body.unwrap_or_default(),
                })
            })
            .collect();

        debug!(
            queue_url = %queue.queue_url,
            message_count = messages.len(),
            "Received messages from SQS"
        );

        Ok(messages)
    }

    async fn delete(
        &self,
        queue: &QueueBinding,
        receipt_handle: &str,
    ) -> Result<(), TransportError> {
        self.client(&queue.region)?
            .delete_message()
            .queue_url(&queue.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| TransportError::DeleteFailed {
                queue_url: queue.queue_url.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(())
    }

    async fn extend_visibility(
        &self,
        queue: &QueueBinding,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let timeout_secs = i32::try_from(timeout.as_secs()).unwrap_or(i32::MAX);

        self.client(&queue.region)?
            .change_message_visibility()
            .queue_url(&queue.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(timeout_secs)
            .send()
            .await
            .map_err(|e| TransportError::VisibilityFailed {
                queue_url: queue.queue_url.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(())
    }
}
