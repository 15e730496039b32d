//! Delivery of custom resource responses to the pre-signed response URL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::error::CallbackError;
use crate::utils::{retry_async, RetryPolicy};

/// Per-request timeout for the callback PUT.
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(60);

/// Sends one response body to a response URL.
///
/// Implementations must return an error for any non-2xx status so that
/// [`CallbackSender`] can retry.
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    async fn put(&self, url: &str, body: &str) -> Result<(), CallbackError>;
}

/// HTTPS transport with certificate verification enabled.
#[derive(Debug, Clone)]
pub struct HttpCallbackTransport {
    http_client: Client,
}

impl HttpCallbackTransport {
    pub fn new() -> Result<Self, CallbackError> {
        let http_client = Client::builder()
            .timeout(CALLBACK_TIMEOUT)
            .build()
            .map_err(|e| CallbackError::RequestFailed(e.to_string()))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl CallbackTransport for HttpCallbackTransport {
    async fn put(&self, url: &str, body: &str) -> Result<(), CallbackError> {
        // The pre-signed URL is signed with an empty content type.
        let response = self
            .http_client
            .put(url)
            .header(CONTENT_TYPE, "")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| CallbackError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(CallbackError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Wraps a [`CallbackTransport`] with the bounded retry policy.
#[derive(Clone)]
pub struct CallbackSender {
    transport: Arc<dyn CallbackTransport>,
    policy: RetryPolicy,
}

impl CallbackSender {
    pub fn new(transport: Arc<dyn CallbackTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Delivers `response` to `url`, retrying per the policy.
    ///
    /// Returns whether delivery eventually succeeded. Exhausted retries are
    /// logged, never raised.
    pub async fn send(&self, url: &str, response: &Map<String, Value>) -> bool {
        let body = match serde_json::to_string(response) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to encode custom resource response");
                return false;
            }
        };
        debug!(target: "wire", url = %url, body = %body, "Sending custom resource response");

        let status = response
            .get("Status")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN");

        let result = retry_async(&self.policy, "custom resource response", |attempt| {
            let body = body.as_str();
            async move {
                debug!(attempt = attempt, "Putting custom resource response");
                self.transport.put(url, body).await
            }
        })
        .await;

        match result {
            Ok(()) => {
                info!(status = %status, "CloudFormation successfully sent response");
                true
            }
            Err(e) => {
                error!(
                    status = %status,
                    attempts = self.policy.max_attempts,
                    error = %e,
                    "Failed sending CloudFormation response"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for CallbackSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSender")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
