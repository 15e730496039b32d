//! CloudFormation custom resource notifications.
//!
//! A queue message body is an SNS envelope whose `Message` field is itself a
//! JSON document describing one lifecycle event:
//!
//! ```text
//! { "Type": "Notification", "Message": "{\"RequestType\":\"Create\", ...}" }
//! ```
//!
//! [`Notification`] validates that event, exposes it to handler commands as
//! environment variables, and reports the outcome back to CloudFormation.

pub mod callback;

pub use callback::{CallbackSender, CallbackTransport, HttpCallbackTransport};

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::queue::MessageEnvelope;

/// Prefix for flattened event variables.
pub const ENV_PREFIX: &str = "Event_";

/// Variable holding the whole event when flattening is disabled.
pub const ENV_EVENT_PROPERTIES: &str = "EventProperties";

/// Reason reported with every failed response.
pub const DEFAULT_FAILURE_REASON: &str = "Unknown Failure";

/// Response keys a handler's own output can never override.
const FORCED_RESPONSE_KEYS: [&str; 4] = ["Status", "StackId", "RequestId", "LogicalResourceId"];

/// Lifecycle phase of a custom resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Create => "Create",
            RequestType::Update => "Update",
            RequestType::Delete => "Delete",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Create" => Ok(RequestType::Create),
            "Update" => Ok(RequestType::Update),
            "Delete" => Ok(RequestType::Delete),
            other => Err(ValidationError::InvalidRequestType(other.to_string())),
        }
    }
}

/// A validated custom resource event and the message that carried it.
#[derive(Debug, Clone)]
pub struct Notification {
    message: MessageEnvelope,
    event: Map<String, Value>,
    request_type: RequestType,
}

impl Notification {
    /// Parses and validates the event carried by `message`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] naming the first missing or invalid
    /// field, or `MalformedEnvelope` if the body is not a JSON envelope
    /// holding a JSON object.
    pub fn from_message(message: MessageEnvelope) -> Result<Self, ValidationError> {
        let event = parse_event(message.body())?;

        for field in ["StackId", "ResponseURL", "RequestType", "ResourceType"] {
            require_str(&event, field)?;
        }

        let request_type = require_str(&event, "RequestType")?.parse()?;

        for field in ["LogicalResourceId", "RequestId"] {
            require_str(&event, field)?;
        }

        Ok(Self {
            message,
            event,
            request_type,
        })
    }

    pub fn message(&self) -> &MessageEnvelope {
        &self.message
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    pub fn stack_id(&self) -> &str {
        self.str_field("StackId").unwrap_or_default()
    }

    pub fn response_url(&self) -> &str {
        self.str_field("ResponseURL").unwrap_or_default()
    }

    pub fn resource_type(&self) -> &str {
        self.str_field("ResourceType").unwrap_or_default()
    }

    pub fn logical_resource_id(&self) -> &str {
        self.str_field("LogicalResourceId").unwrap_or_default()
    }

    pub fn request_id(&self) -> &str {
        self.str_field("RequestId").unwrap_or_default()
    }

    pub fn physical_resource_id(&self) -> Option<&str> {
        self.str_field("PhysicalResourceId").filter(|id| !id.is_empty())
    }

    /// Service token of the event, falling back to `ResourceProperties.ServiceToken`.
    pub fn service_token(&self) -> Option<&str> {
        self.str_field("ServiceToken")
            .or_else(|| self.resource_property("ServiceToken").and_then(Value::as_str))
            .filter(|token| !token.is_empty())
    }

    /// Looks up a key inside `ResourceProperties`.
    pub fn resource_property(&self, name: &str) -> Option<&Value> {
        self.event
            .get("ResourceProperties")
            .and_then(Value::as_object)
            .and_then(|properties| properties.get(name))
    }

    fn str_field(&self, name: &str) -> Option<&str> {
        self.event.get(name).and_then(Value::as_str)
    }

    /// Flattens the event into `Event_`-prefixed variables.
    ///
    /// Nested objects join their key path with `_`, so
    /// `ResourceProperties.Name` becomes `Event_ResourceProperties_Name`.
    pub fn environment(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        flatten_into(&self.event, ENV_PREFIX, &mut env);
        env
    }

    /// Passes the whole event as compact JSON in `EventProperties`.
    pub fn serialized_environment(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(
            ENV_EVENT_PROPERTIES.to_string(),
            Value::Object(self.event.clone()).to_string(),
        );
        env
    }

    /// Builds the response body for this event.
    ///
    /// `attributes` are merged over the generated fields, except for the
    /// status and identity keys which always reflect this event.
    pub fn build_response(
        &self,
        success: bool,
        attributes: Map<String, Value>,
    ) -> Map<String, Value> {
        let physical_resource_id = self
            .physical_resource_id()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let status = if success { "SUCCESS" } else { "FAILED" };
        let mut response = Map::new();
        response.insert("Status".to_string(), Value::String(status.to_string()));
        response.insert("StackId".to_string(), Value::String(self.stack_id().to_string()));
        response.insert("RequestId".to_string(), Value::String(self.request_id().to_string()));
        response.insert(
            "LogicalResourceId".to_string(),
            Value::String(self.logical_resource_id().to_string()),
        );
        response.insert(
            "PhysicalResourceId".to_string(),
            Value::String(physical_resource_id),
        );
        if !success {
            response.insert(
                "Reason".to_string(),
                Value::String(DEFAULT_FAILURE_REASON.to_string()),
            );
        }

        for (key, value) in attributes {
            if !FORCED_RESPONSE_KEYS.contains(&key.as_str()) {
                response.insert(key, value);
            }
        }

        response
    }

    /// Reports the outcome of this event to its response URL.
    ///
    /// The response is built once, so a generated `PhysicalResourceId` is
    /// the same across every delivery attempt. Returns whether delivery
    /// succeeded; failures are logged by the sender.
    pub async fn send_result(
        &self,
        sender: &CallbackSender,
        success: bool,
        attributes: Map<String, Value>,
    ) -> bool {
        let response = self.build_response(success, attributes);
        debug!(
            logical_resource_id = %self.logical_resource_id(),
            request_id = %self.request_id(),
            status = ?response.get("Status"),
            "Sending result"
        );
        sender.send(self.response_url(), &response).await
    }

    /// Removes the carrying message from its queue.
    pub async fn delete(&self) {
        self.message.delete().await;
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}) in {}",
            self.request_type,
            self.logical_resource_id(),
            self.resource_type(),
            self.stack_id()
        )
    }
}

fn parse_event(body: &str) -> Result<Map<String, Value>, ValidationError> {
    let envelope: Value = serde_json::from_str(body)
        .map_err(|e| ValidationError::MalformedEnvelope(format!("body is not JSON: {e}")))?;

    let message = envelope
        .get("Message")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ValidationError::MalformedEnvelope("missing string field 'Message'".to_string())
        })?;

    match serde_json::from_str(message) {
        Ok(Value::Object(event)) => Ok(event),
        Ok(_) => Err(ValidationError::MalformedEnvelope(
            "'Message' is not a JSON object".to_string(),
        )),
        Err(e) => Err(ValidationError::MalformedEnvelope(format!(
            "'Message' is not JSON: {e}"
        ))),
    }
}

fn require_str<'a>(
    event: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    match event.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(field)),
        Some(Value::String(s)) if s.is_empty() => Err(ValidationError::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ValidationError::InvalidField {
            field,
            reason: format!("expected a string, got {other}"),
        }),
    }
}

fn flatten_into(object: &Map<String, Value>, prefix: &str, env: &mut HashMap<String, String>) {
    for (key, value) in object {
        let name = format!("{prefix}{key}");
        match value {
            Value::Object(nested) => flatten_into(nested, &format!("{name}_"), env),
            Value::String(s) => {
                env.insert(name, s.clone());
            }
            other => {
                env.insert(name, other.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{event_json, sns_body, test_envelope, MockCallbackTransport};
    use crate::utils::RetryPolicy;
    use serde_json::json;
    use std::sync::Arc;

    fn notification_from(event: Value) -> Result<Notification, ValidationError> {
        Notification::from_message(test_envelope(&sns_body(&event)))
    }

    fn valid() -> Notification {
        notification_from(event_json("Create")).expect("valid event")
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_parses_valid_event() {
        let notification = valid();

        assert_eq!(notification.request_type(), RequestType::Create);
        assert_eq!(notification.resource_type(), "Custom::Database");
        assert_eq!(notification.logical_resource_id(), "MyDatabase");
        assert_eq!(notification.request_id(), "request-1");
        assert_eq!(notification.response_url(), "https://cfn.example.com/response");
        assert_eq!(notification.physical_resource_id(), None);
    }

    #[test]
    fn test_missing_request_type_fails() {
        let mut event = event_json("Create");
        event.as_object_mut().unwrap().remove("RequestType");

        let err = notification_from(event).expect_err("must fail");
        assert!(matches!(err, ValidationError::MissingField("RequestType")));
    }

    #[test]
    fn test_unknown_request_type_fails() {
        let err = notification_from(event_json("Purge")).expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidRequestType(ref t) if t == "Purge"));
    }

    #[test]
    fn test_each_required_field_is_checked() {
        for field in [
            "StackId",
            "ResponseURL",
            "ResourceType",
            "LogicalResourceId",
            "RequestId",
        ] {
            let mut event = event_json("Update");
            event.as_object_mut().unwrap().remove(field);

            match notification_from(event) {
                Err(ValidationError::MissingField(missing)) => assert_eq!(missing, field),
                other => panic!("expected missing {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_non_string_field_is_invalid() {
        let mut event = event_json("Create");
        event["RequestId"] = json!(42);

        let err = notification_from(event).expect_err("must fail");
        assert!(matches!(
            err,
            ValidationError::InvalidField {
                field: "RequestId",
                ..
            }
        ));
    }

    #[test]
    fn test_malformed_bodies_fail() {
        for body in ["not json", r#"{"Type":"Notification"}"#, r#"{"Message":"[1,2]"}"#] {
            let err = Notification::from_message(test_envelope(body)).expect_err("must fail");
            assert!(matches!(err, ValidationError::MalformedEnvelope(_)), "{body}");
        }
    }

    #[test]
    fn test_environment_flattens_nested_properties() {
        let mut event = event_json("Create");
        event["ResourceProperties"] = json!({"Name": "db1", "Size": 5, "Tags": {"Env": "prod"}});
        let env = notification_from(event).unwrap().environment();

        assert_eq!(env.get("Event_ResourceProperties_Name").map(String::as_str), Some("db1"));
        assert_eq!(env.get("Event_ResourceProperties_Size").map(String::as_str), Some("5"));
        assert_eq!(
            env.get("Event_ResourceProperties_Tags_Env").map(String::as_str),
            Some("prod")
        );
        assert_eq!(env.get("Event_RequestType").map(String::as_str), Some("Create"));
        assert!(!env.contains_key("Event_ResourceProperties"));
    }

    #[test]
    fn test_serialized_environment_holds_event() {
        let env = valid().serialized_environment();
        assert_eq!(env.len(), 1);

        let event: Value = serde_json::from_str(&env[ENV_EVENT_PROPERTIES]).unwrap();
        assert_eq!(event["LogicalResourceId"], "MyDatabase");
    }

    #[test]
    fn test_service_token_falls_back_to_properties() {
        let mut event = event_json("Create");
        event["ResourceProperties"] = json!({"ServiceToken": "arn:aws:sns:token"});
        let notification = notification_from(event).unwrap();
        assert_eq!(notification.service_token(), Some("arn:aws:sns:token"));

        let mut event = event_json("Create");
        event["ServiceToken"] = json!("top-level");
        event["ResourceProperties"] = json!({"ServiceToken": "nested"});
        let notification = notification_from(event).unwrap();
        assert_eq!(notification.service_token(), Some("top-level"));
    }

    #[test]
    fn test_success_response_fields() {
        let response = valid().build_response(true, object(json!({"Endpoint": "x"})));

        assert_eq!(response["Status"], "SUCCESS");
        assert_eq!(response["StackId"], "arn:aws:cloudformation:us-east-1:1:stack/s/1");
        assert_eq!(response["RequestId"], "request-1");
        assert_eq!(response["LogicalResourceId"], "MyDatabase");
        assert_eq!(response["Endpoint"], "x");
        assert!(!response.contains_key("Reason"));
        assert!(Uuid::parse_str(response["PhysicalResourceId"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_failure_response_has_reason() {
        let response = valid().build_response(false, Map::new());

        assert_eq!(response["Status"], "FAILED");
        assert_eq!(response["Reason"], DEFAULT_FAILURE_REASON);
    }

    #[test]
    fn test_attributes_cannot_override_forced_keys() {
        let attributes = object(json!({
            "Status": "SUCCESS",
            "RequestId": "forged",
            "Reason": "disk full",
            "PhysicalResourceId": "db-123"
        }));
        let response = valid().build_response(false, attributes);

        assert_eq!(response["Status"], "FAILED");
        assert_eq!(response["RequestId"], "request-1");
        assert_eq!(response["Reason"], "disk full");
        assert_eq!(response["PhysicalResourceId"], "db-123");
    }

    #[test]
    fn test_existing_physical_resource_id_is_kept() {
        let mut event = event_json("Delete");
        event["PhysicalResourceId"] = json!("db-123");
        let response = notification_from(event)
            .unwrap()
            .build_response(true, Map::new());

        assert_eq!(response["PhysicalResourceId"], "db-123");
    }

    #[tokio::test]
    async fn test_generated_physical_id_is_stable_across_retries() {
        let transport = Arc::new(MockCallbackTransport::failing_times(2));
        let sender = CallbackSender::new(transport.clone(), RetryPolicy::immediate(10));

        assert!(valid().send_result(&sender, true, Map::new()).await);

        let bodies = transport.attempted_bodies();
        assert_eq!(bodies.len(), 3);
        let ids: Vec<Value> = bodies
            .iter()
            .map(|b| serde_json::from_str::<Value>(b).unwrap()["PhysicalResourceId"].clone())
            .collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }
}
