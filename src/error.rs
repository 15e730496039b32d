//! Error types for cfn-resource-bridge operations.
//!
//! Defines error types for every stage a notification passes through:
//! - Handler configuration and loading
//! - Handler registration
//! - Notification validation
//! - Queue and callback transports
//! - External command execution
//!
//! Only [`ConfigError`] and [`RegistryError`] are allowed to stop the bridge,
//! and only during startup. Everything else is logged and absorbed by the
//! component that raised it.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating handler definitions.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("[{name}] in '{source_label}' is missing '{option}' attribute")]
    MissingOption {
        name: String,
        source_label: String,
        option: &'static str,
    },

    #[error("[{name}] in '{source_label}' must define 'region' attribute")]
    MissingRegion { name: String, source_label: String },

    #[error("[{name}] in '{source_label}' must define {option}")]
    MissingAction {
        name: String,
        source_label: String,
        option: &'static str,
    },

    #[error("[{name}] in '{source_label}' has invalid value '{value}' for '{option}': {reason}")]
    InvalidValue {
        name: String,
        source_label: String,
        option: &'static str,
        value: String,
        reason: String,
    },

    #[error("Could not find default configuration file, {config_file}, or additional configurations in the {bridges_dir} directory")]
    NoConfigurationFiles {
        config_file: PathBuf,
        bridges_dir: PathBuf,
    },

    #[error("No resources were defined in {0:?}")]
    NoResources(Vec<PathBuf>),

    #[error("Failed to parse configuration file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during handler registration.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Handler '{existing}' already handles {key}; cannot also register '{rejected}'")]
    DuplicateKey {
        key: String,
        existing: String,
        rejected: String,
    },
}

/// Errors raised while turning a raw queue message into a notification.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Notification requires {0}")]
    MissingField(&'static str),

    #[error("Notification field {field} is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Notification RequestType must be one of Create, Update, Delete (got '{0}')")]
    InvalidRequestType(String),

    #[error("Message body is not a valid notification envelope: {0}")]
    MalformedEnvelope(String),
}

/// Errors reported by the queue transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Receive from {queue_url} failed: {message}")]
    ReceiveFailed { queue_url: String, message: String },

    #[error("Delete from {queue_url} failed: {message}")]
    DeleteFailed { queue_url: String, message: String },

    #[error("Changing visibility on {queue_url} failed: {message}")]
    VisibilityFailed { queue_url: String, message: String },

    #[error("No queue client configured for region '{0}'")]
    UnknownRegion(String),
}

/// Errors reported by the callback transport.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Callback rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Failed to encode callback body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while running an external command.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting for '{command}': {source}")]
    WaitFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Startup failure: the only errors that stop the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}
