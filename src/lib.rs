//! cfn-resource-bridge: run local commands for CloudFormation custom resources.
//!
//! The bridge polls queues subscribed to custom resource notification
//! topics, routes each event to a configured handler, runs that handler's
//! command with the event in its environment, and reports SUCCESS or FAILED
//! to the pre-signed response URL.

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod handler;
pub mod notification;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::BridgeConfig;
pub use error::{
    BridgeError, CallbackError, ConfigError, ExecutionError, RegistryError, TransportError,
    ValidationError,
};
pub use handler::{HandlerDefinition, ResourceHandler};
pub use notification::{Notification, RequestType};
pub use registry::{HandlerKey, HandlerRegistry};
pub use scheduler::{TaskContext, WorkerPool, WorkerPoolConfig};
