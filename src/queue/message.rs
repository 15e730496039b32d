//! A raw message bound to the queue it was received from.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use super::{QueueBinding, QueueTransport, RawMessage};

/// One received message plus the context needed to act on it.
///
/// Both housekeeping operations are best-effort: a failure is logged and
/// swallowed so that a flaky queue can never take a worker down.
#[derive(Clone)]
pub struct MessageEnvelope {
    queue: QueueBinding,
    message: RawMessage,
    transport: Arc<dyn QueueTransport>,
}

impl MessageEnvelope {
    pub fn new(queue: QueueBinding, message: RawMessage, transport: Arc<dyn QueueTransport>) -> Self {
        Self {
            queue,
            message,
            transport,
        }
    }

    pub fn body(&self) -> &str {
        &self.message.body
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message.message_id.as_deref()
    }

    /// Removes this delivery from its queue.
    pub async fn delete(&self) {
        match self
            .transport
            .delete(&self.queue, &self.message.receipt_handle)
            .await
        {
            Ok(()) => debug!(
                queue_url = %self.queue.queue_url,
                message_id = ?self.message.message_id,
                "Deleted message"
            ),
            Err(e) => error!(
                queue_url = %self.queue.queue_url,
                message_id = ?self.message.message_id,
                error = %e,
                "Failed to delete message from queue"
            ),
        }
    }

    /// Hides this delivery from other pollers for another `timeout`.
    pub async fn extend_visibility(&self, timeout: Duration) {
        match self
            .transport
            .extend_visibility(&self.queue, &self.message.receipt_handle, timeout)
            .await
        {
            Ok(()) => debug!(
                queue_url = %self.queue.queue_url,
                message_id = ?self.message.message_id,
                timeout_secs = timeout.as_secs(),
                "Extended message visibility"
            ),
            Err(e) => error!(
                queue_url = %self.queue.queue_url,
                message_id = ?self.message.message_id,
                error = %e,
                "Failed to change visibility of message"
            ),
        }
    }
}

impl std::fmt::Debug for MessageEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageEnvelope")
            .field("queue", &self.queue)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockQueueTransport;

    fn envelope(transport: Arc<MockQueueTransport>) -> MessageEnvelope {
        MessageEnvelope::new(
            QueueBinding::new("https://queue.us-east-1.amazonaws.com/1/q", "us-east-1"),
            RawMessage::new("receipt-1", "{}").with_message_id("m-1"),
            transport,
        )
    }

    #[tokio::test]
    async fn test_delete_uses_receipt_handle() {
        let transport = Arc::new(MockQueueTransport::new());
        envelope(Arc::clone(&transport)).delete().await;

        assert_eq!(transport.deleted(), vec!["receipt-1".to_string()]);
    }

    #[tokio::test]
    async fn test_extend_visibility_passes_timeout() {
        let transport = Arc::new(MockQueueTransport::new());
        envelope(Arc::clone(&transport))
            .extend_visibility(Duration::from_secs(600))
            .await;

        assert_eq!(
            transport.visibility_changes(),
            vec![("receipt-1".to_string(), Duration::from_secs(600))]
        );
    }

    #[tokio::test]
    async fn test_housekeeping_failures_are_swallowed() {
        let transport = Arc::new(MockQueueTransport::new().failing_housekeeping());
        let envelope = envelope(Arc::clone(&transport));

        envelope.delete().await;
        envelope.extend_visibility(Duration::from_secs(30)).await;

        assert!(transport.deleted().is_empty());
        assert!(transport.visibility_changes().is_empty());
    }
}
