//! Resource handlers: the binding from a queue to local commands.
//!
//! A handler is created once at startup from a [`HandlerDefinition`] and is
//! immutable afterwards, so workers share it through an `Arc` without
//! locking.
//!
//! # Execution
//!
//! ```text
//! Notification ──► phase command ──► ProcessRunner ──► stdout JSON ──► callback
//!                  (Create/Update/Delete)               (attributes)
//! ```
//!
//! A run succeeds only when the command exits zero and its stdout is either
//! empty or a JSON object.

pub mod definition;

pub use definition::HandlerDefinition;

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::error::ConfigError;
use crate::execution::ProcessRunner;
use crate::notification::{CallbackSender, Notification, RequestType};
use crate::queue::QueueBinding;

/// Default time a handler may spend on one event: 30 minutes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

fn queue_region_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^https?://(?:queue|sqs)\.([^.]+?)\.amazonaws\..+")
            .expect("queue region pattern is valid")
    })
}

/// Extracts the region from `queue.<region>.amazonaws...` or
/// `sqs.<region>.amazonaws...` queue URLs.
pub fn region_from_queue_url(queue_url: &str) -> Option<String> {
    queue_region_pattern()
        .captures(queue_url)
        .and_then(|captures| captures.get(1))
        .map(|region| region.as_str().to_string())
}

/// A value that differs per lifecycle phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerPhase<T> {
    pub create: T,
    pub update: T,
    pub delete: T,
}

impl<T> PerPhase<T> {
    pub fn get(&self, request_type: RequestType) -> &T {
        match request_type {
            RequestType::Create => &self.create,
            RequestType::Update => &self.update,
            RequestType::Delete => &self.delete,
        }
    }
}

/// A validated, immutable handler registration.
#[derive(Debug, Clone)]
pub struct ResourceHandler {
    name: String,
    source: String,
    queue: QueueBinding,
    service_token: Option<String>,
    resource_type: Option<String>,
    flatten: bool,
    timeouts: PerPhase<Duration>,
    actions: PerPhase<String>,
}

impl ResourceHandler {
    /// Validates `definition` and builds a handler from it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the queue URL is missing, no region can be
    /// determined, a timeout or flag does not parse, or any of the three
    /// phase actions resolves to an empty command.
    pub fn from_definition(definition: HandlerDefinition) -> Result<Self, ConfigError> {
        let HandlerDefinition {
            name,
            source,
            queue_url,
            region,
            service_token,
            resource_type,
            flatten,
            default_action,
            create_action,
            update_action,
            delete_action,
            timeout,
            create_timeout,
            update_timeout,
            delete_timeout,
        } = definition;

        let queue_url = queue_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ConfigError::MissingOption {
                name: name.clone(),
                source_label: source.clone(),
                option: definition::OPTION_QUEUE_URL,
            })?;

        let region = region
            .filter(|region| !region.is_empty())
            .or_else(|| region_from_queue_url(&queue_url))
            .ok_or_else(|| ConfigError::MissingRegion {
                name: name.clone(),
                source_label: source.clone(),
            })?;

        let flatten = match flatten {
            None => true,
            Some(value) => parse_flag(&value),
        };

        let parse = |option: &'static str, value: Option<String>, fallback: Duration| {
            parse_timeout(&name, &source, option, value, fallback)
        };
        let timeout = parse(definition::OPTION_TIMEOUT, timeout, DEFAULT_TIMEOUT)?;
        let timeouts = PerPhase {
            create: parse(definition::OPTION_CREATE_TIMEOUT, create_timeout, timeout)?,
            update: parse(definition::OPTION_UPDATE_TIMEOUT, update_timeout, timeout)?,
            delete: parse(definition::OPTION_DELETE_TIMEOUT, delete_timeout, timeout)?,
        };

        // An explicitly empty phase action does not fall back to the default.
        let action = |option: &'static str, value: Option<String>| {
            value
                .or_else(|| default_action.clone())
                .filter(|command| !command.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingAction {
                    name: name.clone(),
                    source_label: source.clone(),
                    option,
                })
        };
        let actions = PerPhase {
            create: action(definition::OPTION_CREATE_ACTION, create_action)?,
            update: action(definition::OPTION_UPDATE_ACTION, update_action)?,
            delete: action(definition::OPTION_DELETE_ACTION, delete_action)?,
        };

        Ok(Self {
            name,
            source,
            queue: QueueBinding::new(queue_url, region),
            service_token: service_token.filter(|token| !token.is_empty()),
            resource_type: resource_type.filter(|kind| !kind.is_empty()),
            flatten,
            timeouts,
            actions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn queue(&self) -> &QueueBinding {
        &self.queue
    }

    pub fn queue_url(&self) -> &str {
        &self.queue.queue_url
    }

    pub fn region(&self) -> &str {
        &self.queue.region
    }

    pub fn service_token(&self) -> Option<&str> {
        self.service_token.as_deref()
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    pub fn flatten(&self) -> bool {
        self.flatten
    }

    pub fn timeouts(&self) -> &PerPhase<Duration> {
        &self.timeouts
    }

    pub fn actions(&self) -> &PerPhase<String> {
        &self.actions
    }

    /// Visibility timeout to apply while this handler works on `notification`.
    pub fn timeout_for(&self, notification: &Notification) -> Duration {
        *self.timeouts.get(notification.request_type())
    }

    /// Command to run for `notification`'s lifecycle phase.
    pub fn action_for(&self, notification: &Notification) -> &str {
        self.actions.get(notification.request_type())
    }

    /// Environment handed to the command for `notification`.
    pub fn environment_for(&self, notification: &Notification) -> HashMap<String, String> {
        if self.flatten {
            notification.environment()
        } else {
            notification.serialized_environment()
        }
    }

    /// Runs the phase command for `notification` and reports the outcome.
    ///
    /// Every failure, including a command that cannot be spawned, ends in a
    /// `FAILED` response rather than an error. Returns whether the command
    /// succeeded.
    pub async fn execute(
        &self,
        notification: &Notification,
        runner: &dyn ProcessRunner,
        sender: &CallbackSender,
    ) -> bool {
        let request_type = notification.request_type();
        let command = self.action_for(notification);
        let env = self.environment_for(notification);

        let output = match runner.run(command, &env).await {
            Ok(output) => output,
            Err(e) => {
                error!(
                    handler = %self.name,
                    request_type = %request_type,
                    command = %command,
                    error = %e,
                    "Command could not be run"
                );
                notification.send_result(sender, false, Map::new()).await;
                return false;
            }
        };

        let result_text = output.stdout.trim();
        let (parsed, attributes) = parse_attributes(result_text);
        if !parsed {
            error!(
                handler = %self.name,
                request_type = %request_type,
                command = %command,
                output = %result_text,
                "Command returned invalid data"
            );
        }

        let success = parsed && output.succeeded();
        if output.succeeded() {
            info!(handler = %self.name, request_type = %request_type, "Command succeeded");
        } else {
            error!(
                handler = %self.name,
                request_type = %request_type,
                command = %command,
                exit_code = ?output.exit_code,
                "Command failed"
            );
        }
        debug!(handler = %self.name, output = %result_text, "Command stdout");
        debug!(handler = %self.name, stderr = %output.stderr.trim(), "Command stderr");

        notification.send_result(sender, success, attributes).await;
        success
    }
}

impl fmt::Display for ResourceHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] in '{}'", self.name, self.source)
    }
}

/// Parses command output into response attributes.
///
/// Empty output is a valid empty object. Anything that is not a JSON object
/// is rejected and yields no attributes.
fn parse_attributes(text: &str) -> (bool, Map<String, Value>) {
    if text.is_empty() {
        return (true, Map::new());
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(attributes)) => (true, attributes),
        _ => (false, Map::new()),
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "no" | "false" | "off"
    )
}

fn parse_timeout(
    name: &str,
    source: &str,
    option: &'static str,
    value: Option<String>,
    fallback: Duration,
) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(fallback);
    };
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            source_label: source.to_string(),
            option,
            value: value.clone(),
            reason: e.to_string(),
        })
}
