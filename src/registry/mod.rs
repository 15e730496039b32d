//! Handler registry and notification routing.
//!
//! This module provides:
//! - Registration of handlers under a unique [`HandlerKey`]
//! - The list of distinct queues that need a poller
//! - Resolution of an incoming notification to exactly one handler
//!
//! The registry is filled once at startup and then shared read-only behind an
//! `Arc`, so lookups need no locking.

pub mod key;

pub use key::HandlerKey;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::error::RegistryError;
use crate::handler::ResourceHandler;
use crate::queue::QueueBinding;

/// All registered handlers, indexed by routing key.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKey, Arc<ResourceHandler>>,
    /// Distinct queues in first-registration order.
    queues: Vec<QueueBinding>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a list of handlers.
    ///
    /// # Errors
    /// Returns `DuplicateKey` on the first handler whose key is taken.
    pub fn from_handlers<I>(handlers: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = ResourceHandler>,
    {
        let mut registry = Self::new();
        for handler in handlers {
            registry.register(handler)?;
        }
        Ok(registry)
    }

    /// Key a handler is registered under.
    pub fn key_of(handler: &ResourceHandler) -> HandlerKey {
        HandlerKey::new(
            handler.queue_url(),
            handler.service_token(),
            handler.resource_type(),
        )
    }

    /// Register a handler.
    ///
    /// The first handler seen for a queue also registers that queue for
    /// polling.
    ///
    /// # Errors
    /// Returns `DuplicateKey` if a handler already owns the exact key.
    pub fn register(&mut self, handler: ResourceHandler) -> Result<Arc<ResourceHandler>, RegistryError> {
        let key = Self::key_of(&handler);

        if let Some(existing) = self.handlers.get(&key) {
            return Err(RegistryError::DuplicateKey {
                key: key.to_string(),
                existing: existing.to_string(),
                rejected: handler.to_string(),
            });
        }

        if !self.queues.iter().any(|q| q.queue_url == handler.queue_url()) {
            self.queues.push(handler.queue().clone());
        }

        info!(handler = %handler, key = %key, "Registered handler");
        let handler = Arc::new(handler);
        self.handlers.insert(key, Arc::clone(&handler));

        Ok(handler)
    }

    /// Find the most specific handler for a notification.
    ///
    /// Tries (queue, token, type), (queue, type), (queue, token) and finally
    /// the queue-wide handler, returning the first hit.
    pub fn resolve(
        &self,
        queue_url: &str,
        service_token: Option<&str>,
        resource_type: Option<&str>,
    ) -> Option<Arc<ResourceHandler>> {
        HandlerKey::new(queue_url, service_token, resource_type)
            .lookup_order()
            .iter()
            .find_map(|key| self.handlers.get(key).cloned())
    }

    /// Queues that need a poller, one entry per distinct queue URL.
    pub fn queues(&self) -> &[QueueBinding] {
        &self.queues
    }

    /// All routing keys, sorted for stable diagnostics.
    pub fn keys(&self) -> Vec<&HandlerKey> {
        let mut keys: Vec<&HandlerKey> = self.handlers.keys().collect();
        keys.sort();
        keys
    }

    /// Registered handlers paired with their keys, sorted by key.
    pub fn entries(&self) -> Vec<(&HandlerKey, &Arc<ResourceHandler>)> {
        let mut entries: Vec<_> = self.handlers.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// One line per key, for logging a routing miss.
    pub fn describe(&self) -> String {
        self.entries()
            .iter()
            .map(|(key, handler)| format!("{key} => {handler}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
