//! Units of work executed by the pool.
//!
//! There are exactly two kinds of task:
//!
//! - [`PollTask`]: long-polls one queue, validates and routes what it
//!   receives, and yields a [`WorkTask`] per routed notification. The pool
//!   re-queues a poll task after every run, so each queue is polled forever.
//! - [`WorkTask`]: runs one handler for one notification, then deletes the
//!   message. It yields nothing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::execution::ProcessRunner;
use crate::handler::ResourceHandler;
use crate::notification::{CallbackSender, Notification};
use crate::queue::{MessageEnvelope, QueueBinding, QueueTransport};
use crate::registry::HandlerRegistry;

/// Default long-poll wait.
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(20);

/// Default number of messages requested per poll.
pub const DEFAULT_MAX_MESSAGES: u32 = 1;

/// Upper bound on messages requested per poll.
pub const MAX_MESSAGES_LIMIT: u32 = 10;

/// Collaborators shared by every task.
#[derive(Clone)]
pub struct TaskContext {
    pub transport: Arc<dyn QueueTransport>,
    pub runner: Arc<dyn ProcessRunner>,
    pub sender: CallbackSender,
    pub registry: Arc<HandlerRegistry>,
    pub wait_time: Duration,
    pub max_messages: u32,
}

impl TaskContext {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        runner: Arc<dyn ProcessRunner>,
        sender: CallbackSender,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            transport,
            runner,
            sender,
            registry,
            wait_time: DEFAULT_WAIT_TIME,
            max_messages: DEFAULT_MAX_MESSAGES,
        }
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Sets messages per poll, clamped to `1..=10`.
    pub fn with_max_messages(mut self, max_messages: u32) -> Self {
        self.max_messages = max_messages.clamp(1, MAX_MESSAGES_LIMIT);
        self
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("handlers", &self.registry.len())
            .field("wait_time", &self.wait_time)
            .field("max_messages", &self.max_messages)
            .finish_non_exhaustive()
    }
}

/// A unit of work on the shared task queue.
#[derive(Debug)]
pub enum Task {
    Poll(PollTask),
    Work(WorkTask),
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Task::Poll(_) => "poll",
            Task::Work(_) => "work",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Poll(poll) => write!(f, "poll {}", poll.queue.queue_url),
            Task::Work(work) => write!(f, "work {} for {}", work.notification, work.handler),
        }
    }
}

/// What one poll produced.
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// Messages handed over by the transport, valid or not.
    pub received: usize,
    /// Work for every routed notification, in receive order.
    pub work: Vec<WorkTask>,
}

/// Polls one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTask {
    queue: QueueBinding,
}

impl PollTask {
    pub fn new(queue: QueueBinding) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &QueueBinding {
        &self.queue
    }

    /// Receives one batch and routes it.
    ///
    /// Transport failures yield an empty outcome. Invalid messages are
    /// deleted. Messages no handler matches stay on the queue so another
    /// bridge can pick them up.
    pub async fn poll(&self, ctx: &TaskContext) -> PollOutcome {
        let messages = match ctx
            .transport
            .receive(&self.queue, ctx.wait_time, ctx.max_messages)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                error!(queue_url = %self.queue.queue_url, error = %e, "Failed to receive messages");
                return PollOutcome::default();
            }
        };

        let mut outcome = PollOutcome {
            received: messages.len(),
            work: Vec::with_capacity(messages.len()),
        };

        for raw in messages {
            let envelope =
                MessageEnvelope::new(self.queue.clone(), raw, Arc::clone(&ctx.transport));
            debug!(
                queue_url = %self.queue.queue_url,
                message_id = ?envelope.message_id(),
                "Received message"
            );

            let notification = match Notification::from_message(envelope.clone()) {
                Ok(notification) => notification,
                Err(e) => {
                    error!(
                        queue_url = %self.queue.queue_url,
                        message_id = ?envelope.message_id(),
                        error = %e,
                        "Invalid notification, deleting message"
                    );
                    envelope.delete().await;
                    continue;
                }
            };

            let service_token = notification.service_token();
            let resource_type = Some(notification.resource_type());
            let Some(handler) =
                ctx.registry
                    .resolve(&self.queue.queue_url, service_token, resource_type)
            else {
                error!(
                    queue_url = %self.queue.queue_url,
                    service_token = service_token.unwrap_or("*"),
                    resource_type = notification.resource_type(),
                    registry = %ctx.registry.describe(),
                    "No handler matches notification, leaving it on the queue"
                );
                continue;
            };

            notification
                .message()
                .extend_visibility(handler.timeout_for(&notification))
                .await;
            info!(handler = %handler, notification = %notification, "Routed notification");

            outcome.work.push(WorkTask::new(handler, notification));
        }

        outcome
    }
}

/// Runs one handler for one notification.
#[derive(Debug)]
pub struct WorkTask {
    handler: Arc<ResourceHandler>,
    notification: Notification,
}

impl WorkTask {
    pub fn new(handler: Arc<ResourceHandler>, notification: Notification) -> Self {
        Self {
            handler,
            notification,
        }
    }

    pub fn handler(&self) -> &ResourceHandler {
        &self.handler
    }

    pub fn notification(&self) -> &Notification {
        &self.notification
    }

    /// Executes the handler and deletes the message whatever the result.
    ///
    /// A response has been sent, or given up on, by the time the handler
    /// returns, so the message is never redelivered.
    pub async fn run(self, ctx: &TaskContext) -> bool {
        let success = self
            .handler
            .execute(&self.notification, ctx.runner.as_ref(), &ctx.sender)
            .await;
        self.notification.delete().await;
        success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::execution::ProcessOutput;
    use crate::handler::HandlerDefinition;
    use crate::queue::RawMessage;
    use crate::testing::{
        event_json, sns_body, LogCapture, MockCallbackTransport, MockProcessRunner,
        MockQueueTransport,
    };
    use crate::utils::RetryPolicy;
    use serde_json::json;

    const QUEUE: &str = "https://queue.us-east-1.amazonaws.com/1/bridge";

    fn binding() -> QueueBinding {
        QueueBinding::new(QUEUE, "us-east-1")
    }

    fn handler(name: &str, resource_type: Option<&str>, delete_timeout: &str) -> ResourceHandler {
        let mut definition = HandlerDefinition::new(name, "test.conf")
            .with_option("queue_url", QUEUE)
            .with_option("default_action", "run.sh")
            .with_option("delete_timeout", delete_timeout);
        definition.resource_type = resource_type.map(str::to_string);
        ResourceHandler::from_definition(definition).unwrap()
    }

    fn context(
        transport: Arc<MockQueueTransport>,
        runner: Arc<MockProcessRunner>,
        callbacks: Arc<MockCallbackTransport>,
        handlers: Vec<ResourceHandler>,
    ) -> TaskContext {
        TaskContext::new(
            transport,
            runner,
            CallbackSender::new(callbacks, RetryPolicy::immediate(3)),
            Arc::new(HandlerRegistry::from_handlers(handlers).unwrap()),
        )
        .with_wait_time(Duration::from_millis(1))
    }

    fn message(receipt: &str, request_type: &str) -> RawMessage {
        RawMessage::new(receipt, sns_body(&event_json(request_type)))
    }

    #[test]
    fn test_max_messages_is_clamped() {
        let ctx = context(
            Arc::new(MockQueueTransport::new()),
            Arc::new(MockProcessRunner::returning(ProcessOutput::new(0, "", ""))),
            Arc::new(MockCallbackTransport::new()),
            vec![],
        );
        assert_eq!(ctx.max_messages, DEFAULT_MAX_MESSAGES);
        assert_eq!(ctx.clone().with_max_messages(50).max_messages, 10);
        assert_eq!(ctx.with_max_messages(0).max_messages, 1);
    }

    #[tokio::test]
    async fn test_poll_routes_and_extends_visibility() {
        let transport = Arc::new(MockQueueTransport::new().with_batch(vec![message("r-1", "Delete")]));
        let ctx = context(
            transport.clone(),
            Arc::new(MockProcessRunner::returning(ProcessOutput::new(0, "", ""))),
            Arc::new(MockCallbackTransport::new()),
            vec![handler("db", Some("Custom::Database"), "90")],
        );

        let outcome = PollTask::new(binding()).poll(&ctx).await;

        assert_eq!(outcome.received, 1);
        assert_eq!(outcome.work.len(), 1);
        assert_eq!(outcome.work[0].handler().name(), "db");
        assert_eq!(
            transport.visibility_changes(),
            vec![("r-1".to_string(), Duration::from_secs(90))]
        );
        assert!(transport.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_poll_deletes_invalid_messages() {
        let transport = Arc::new(MockQueueTransport::new().with_batch(vec![
            RawMessage::new("bad-json", "not json"),
            RawMessage::new("bad-type", sns_body(&event_json("Purge"))),
            message("good", "Create"),
        ]));
        let ctx = context(
            transport.clone(),
            Arc::new(MockProcessRunner::returning(ProcessOutput::new(0, "", ""))),
            Arc::new(MockCallbackTransport::new()),
            vec![handler("any", None, "60")],
        );

        let outcome = PollTask::new(binding()).poll(&ctx).await;

        assert_eq!(outcome.received, 3);
        assert_eq!(outcome.work.len(), 1);
        assert_eq!(
            transport.deleted(),
            vec!["bad-json".to_string(), "bad-type".to_string()]
        );
    }

    #[tokio::test]
    async fn test_poll_leaves_unmatched_messages() {
        let transport = Arc::new(MockQueueTransport::new().with_batch(vec![message("r-1", "Create")]));
        let ctx = context(
            transport.clone(),
            Arc::new(MockProcessRunner::returning(ProcessOutput::new(0, "", ""))),
            Arc::new(MockCallbackTransport::new()),
            vec![handler("other", Some("Custom::Other"), "60")],
        );

        let logs = LogCapture::default();
        let outcome = {
            let _guard = logs.install();
            PollTask::new(binding()).poll(&ctx).await
        };

        assert_eq!(outcome.received, 1);
        assert!(outcome.work.is_empty());
        assert!(transport.deleted().is_empty());
        assert!(transport.visibility_changes().is_empty());

        let line = logs
            .line_with("No handler matches notification")
            .expect("routing miss is logged");
        assert!(line.contains("ERROR"), "unexpected level: {line}");
        assert!(line.contains("Custom::Database"));
    }

    #[tokio::test]
    async fn test_poll_survives_receive_failure() {
        let transport = Arc::new(MockQueueTransport::new().with_receive_error(
            TransportError::ReceiveFailed {
                queue_url: QUEUE.to_string(),
                message: "throttled".to_string(),
            },
        ));
        let ctx = context(
            transport,
            Arc::new(MockProcessRunner::returning(ProcessOutput::new(0, "", ""))),
            Arc::new(MockCallbackTransport::new()),
            vec![handler("any", None, "60")],
        );

        let outcome = PollTask::new(binding()).poll(&ctx).await;

        assert_eq!(outcome.received, 0);
        assert!(outcome.work.is_empty());
    }

    #[tokio::test]
    async fn test_poll_routes_by_service_token() {
        let mut event = event_json("Create");
        event["ServiceToken"] = json!("arn:aws:sns:us-east-1:1:bridge");
        let transport = Arc::new(
            MockQueueTransport::new().with_batch(vec![RawMessage::new("r-1", sns_body(&event))]),
        );

        let mut definition = HandlerDefinition::new("tokened", "test.conf")
            .with_option("queue_url", QUEUE)
            .with_option("default_action", "run.sh");
        definition.service_token = Some("arn:aws:sns:us-east-1:1:bridge".to_string());
        let tokened = ResourceHandler::from_definition(definition).unwrap();

        let ctx = context(
            transport,
            Arc::new(MockProcessRunner::returning(ProcessOutput::new(0, "", ""))),
            Arc::new(MockCallbackTransport::new()),
            vec![handler("fallback", None, "60"), tokened],
        );

        let outcome = PollTask::new(binding()).poll(&ctx).await;
        assert_eq!(outcome.work[0].handler().name(), "tokened");
    }

    #[tokio::test]
    async fn test_work_deletes_after_failure() {
        let transport = Arc::new(MockQueueTransport::new().with_batch(vec![message("r-1", "Update")]));
        let runner = Arc::new(MockProcessRunner::returning(ProcessOutput::new(2, "", "boom")));
        let callbacks = Arc::new(MockCallbackTransport::new());
        let ctx = context(
            transport.clone(),
            runner.clone(),
            callbacks.clone(),
            vec![handler("db", None, "60")],
        );

        let mut outcome = PollTask::new(binding()).poll(&ctx).await;
        let work = outcome.work.pop().expect("work task");
        let success = work.run(&ctx).await;

        assert!(!success);
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(callbacks.delivered().len(), 1);
        assert_eq!(transport.deleted(), vec!["r-1".to_string()]);
    }

    #[tokio::test]
    async fn test_work_deletes_even_when_callback_fails() {
        let transport = Arc::new(MockQueueTransport::new().with_batch(vec![message("r-1", "Create")]));
        let callbacks = Arc::new(MockCallbackTransport::failing_times(u32::MAX));
        let ctx = context(
            transport.clone(),
            Arc::new(MockProcessRunner::returning(ProcessOutput::new(0, "{}", ""))),
            callbacks.clone(),
            vec![handler("db", None, "60")],
        );

        let work = PollTask::new(binding()).poll(&ctx).await.work.remove(0);
        assert!(work.run(&ctx).await);
        assert_eq!(callbacks.attempts(), 3);
        assert_eq!(transport.deleted(), vec!["r-1".to_string()]);
    }

    #[test]
    fn test_task_display() {
        let task = Task::Poll(PollTask::new(binding()));
        assert_eq!(task.kind(), "poll");
        assert_eq!(task.to_string(), format!("poll {QUEUE}"));
    }
}
