//! Queue transport and message envelopes.
//!
//! The bridge talks to its queues only through the [`QueueTransport`] trait:
//!
//! - **receive**: long-poll a queue for a batch of raw messages
//! - **delete**: remove a processed message by receipt handle
//! - **extend_visibility**: push back redelivery of an in-flight message
//!
//! [`SqsTransport`] is the production implementation. [`MessageEnvelope`]
//! binds one raw message to the queue it came from and turns transport
//! failures on housekeeping calls into log lines.

pub mod message;
pub mod sqs;

pub use message::MessageEnvelope;
pub use sqs::SqsTransport;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

/// A message exactly as the queue handed it over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Transport-assigned message id, when the transport reports one.
    pub message_id: Option<String>,
    /// Handle used to delete or re-time this particular delivery.
    pub receipt_handle: String,
    /// Unparsed message body.
    pub body: String,
}

impl RawMessage {
    /// Creates a raw message.
    pub fn new(receipt_handle: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: None,
            receipt_handle: receipt_handle.into(),
            body: body.into(),
        }
    }

    /// Sets the message id.
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }
}

/// Identifies one polled queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueBinding {
    pub queue_url: String,
    pub region: String,
}

impl QueueBinding {
    pub fn new(queue_url: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            region: region.into(),
        }
    }
}

/// Operations the bridge needs from a message queue service.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Long-polls `queue` for up to `wait`, returning at most `max_messages`.
    async fn receive(
        &self,
        queue: &QueueBinding,
        wait: Duration,
        max_messages: u32,
    ) -> Result<Vec<RawMessage>, TransportError>;

    /// Deletes the delivery identified by `receipt_handle`.
    async fn delete(&self, queue: &QueueBinding, receipt_handle: &str)
        -> Result<(), TransportError>;

    /// Sets the remaining visibility timeout of a delivery to `timeout`.
    async fn extend_visibility(
        &self,
        queue: &QueueBinding,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), TransportError>;
}
