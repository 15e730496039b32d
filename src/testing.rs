//! Mock collaborators and fixtures shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{CallbackError, ExecutionError, TransportError};
use crate::execution::{ProcessOutput, ProcessRunner};
use crate::notification::{CallbackTransport, Notification};
use crate::queue::{MessageEnvelope, QueueBinding, QueueTransport, RawMessage};

pub const TEST_QUEUE_URL: &str = "https://queue.us-east-1.amazonaws.com/1/bridge";

/// A custom resource event with every required field set.
pub fn event_json(request_type: &str) -> Value {
    json!({
        "RequestType": request_type,
        "ResponseURL": "https://cfn.example.com/response",
        "StackId": "arn:aws:cloudformation:us-east-1:1:stack/s/1",
        "RequestId": "request-1",
        "ResourceType": "Custom::Database",
        "LogicalResourceId": "MyDatabase",
        "ResourceProperties": {}
    })
}

/// Wraps an event in an SNS notification body.
pub fn sns_body(event: &Value) -> String {
    json!({
        "Type": "Notification",
        "MessageId": "sns-1",
        "Message": event.to_string()
    })
    .to_string()
}

/// Collects formatted log lines emitted on the current thread.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Routes this thread's events into the capture until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Returns the captured line containing `message`, if any.
    pub fn line_with(&self, message: &str) -> Option<String> {
        let contents = String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned();
        contents
            .lines()
            .find(|line| line.contains(message))
            .map(str::to_string)
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An envelope for `body` backed by a fresh mock transport.
pub fn test_envelope(body: &str) -> MessageEnvelope {
    MessageEnvelope::new(
        QueueBinding::new(TEST_QUEUE_URL, "us-east-1"),
        RawMessage::new("receipt-1", body),
        Arc::new(MockQueueTransport::new()),
    )
}

/// A validated notification for `event`.
pub fn notification_for(event: Value) -> Notification {
    Notification::from_message(test_envelope(&sns_body(&event))).expect("valid test event")
}

/// Queue transport serving scripted batches and recording housekeeping.
#[derive(Default)]
pub struct MockQueueTransport {
    batches: Mutex<VecDeque<Vec<RawMessage>>>,
    receive_error: Mutex<Option<TransportError>>,
    fail_housekeeping: bool,
    polled: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    visibility: Mutex<Vec<(String, Duration)>>,
}

impl MockQueueTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a batch for a later `receive`, in order.
    pub fn with_batch(self, batch: Vec<RawMessage>) -> Self {
        self.batches.lock().unwrap().push_back(batch);
        self
    }

    /// Makes the next `receive` fail.
    pub fn with_receive_error(self, error: TransportError) -> Self {
        *self.receive_error.lock().unwrap() = Some(error);
        self
    }

    /// Makes every delete and visibility change fail without recording.
    pub fn failing_housekeeping(mut self) -> Self {
        self.fail_housekeeping = true;
        self
    }

    pub fn polled_queues(&self) -> Vec<String> {
        self.polled.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn visibility_changes(&self) -> Vec<(String, Duration)> {
        self.visibility.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueTransport for MockQueueTransport {
    async fn receive(
        &self,
        queue: &QueueBinding,
        wait: Duration,
        _max_messages: u32,
    ) -> Result<Vec<RawMessage>, TransportError> {
        self.polled.lock().unwrap().push(queue.queue_url.clone());

        if let Some(error) = self.receive_error.lock().unwrap().take() {
            return Err(error);
        }

        let batch = self.batches.lock().unwrap().pop_front();
        match batch {
            Some(batch) => Ok(batch),
            None => {
                // An empty long poll still takes time.
                tokio::time::sleep(wait.min(Duration::from_millis(5))).await;
                Ok(Vec::new())
            }
        }
    }

    async fn delete(&self, queue: &QueueBinding, receipt_handle: &str) -> Result<(), TransportError> {
        if self.fail_housekeeping {
            return Err(TransportError::DeleteFailed {
                queue_url: queue.queue_url.clone(),
                message: "mock failure".to_string(),
            });
        }
        self.deleted.lock().unwrap().push(receipt_handle.to_string());
        Ok(())
    }

    async fn extend_visibility(
        &self,
        queue: &QueueBinding,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        if self.fail_housekeeping {
            return Err(TransportError::VisibilityFailed {
                queue_url: queue.queue_url.clone(),
                message: "mock failure".to_string(),
            });
        }
        self.visibility
            .lock()
            .unwrap()
            .push((receipt_handle.to_string(), timeout));
        Ok(())
    }
}

/// Process runner returning a fixed output and recording every call.
pub struct MockProcessRunner {
    output: Option<ProcessOutput>,
    calls: Mutex<Vec<(String, HashMap<String, String>)>>,
}

impl MockProcessRunner {
    pub fn returning(output: ProcessOutput) -> Self {
        Self {
            output: Some(output),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every run fails as if the command could not be started.
    pub fn failing_to_spawn() -> Self {
        Self {
            output: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, HashMap<String, String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(
        &self,
        command: &str,
        env: &HashMap<String, String>,
    ) -> Result<ProcessOutput, ExecutionError> {
        self.calls
            .lock()
            .unwrap()
            .push((command.to_string(), env.clone()));

        self.output.clone().ok_or_else(|| ExecutionError::SpawnFailed {
            command: command.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "mock spawn failure"),
        })
    }
}

/// Callback transport failing a set number of times before accepting.
pub struct MockCallbackTransport {
    failures_left: AtomicU32,
    attempts: AtomicU32,
    attempted_bodies: Mutex<Vec<String>>,
    delivered: Mutex<Vec<(String, String)>>,
}

impl MockCallbackTransport {
    pub fn new() -> Self {
        Self::failing_times(0)
    }

    pub fn failing_times(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
            attempted_bodies: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn attempted_bodies(&self) -> Vec<String> {
        self.attempted_bodies.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<(String, String)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackTransport for MockCallbackTransport {
    async fn put(&self, url: &str, body: &str) -> Result<(), CallbackError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.attempted_bodies.lock().unwrap().push(body.to_string());

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CallbackError::Rejected {
                status: 503,
                body: "mock failure".to_string(),
            });
        }

        self.delivered
            .lock()
            .unwrap()
            .push((url.to_string(), body.to_string()));
        Ok(())
    }
}
