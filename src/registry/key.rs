//! Routing keys for handler lookup.

use std::fmt;

use serde::Serialize;

/// The (queue, service token, resource type) triple a handler is keyed by.
///
/// `None` fields are wildcards during lookup only. At registration the
/// triple, `None`s included, must be unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HandlerKey {
    pub queue_url: String,
    pub service_token: Option<String>,
    pub resource_type: Option<String>,
}

impl HandlerKey {
    pub fn new(
        queue_url: impl Into<String>,
        service_token: Option<&str>,
        resource_type: Option<&str>,
    ) -> Self {
        Self {
            queue_url: queue_url.into(),
            service_token: service_token.map(str::to_string),
            resource_type: resource_type.map(str::to_string),
        }
    }

    /// Keys to try for a lookup, most specific first.
    ///
    /// The order is fixed: (token, type), (type), (token), (neither). Steps
    /// that would repeat an earlier key because a field is absent are
    /// skipped.
    pub fn lookup_order(&self) -> Vec<HandlerKey> {
        let token = self.service_token.as_deref();
        let kind = self.resource_type.as_deref();
        let candidates = [
            (token, kind),
            (None, kind),
            (token, None),
            (None, None),
        ];

        let mut keys: Vec<HandlerKey> = Vec::with_capacity(candidates.len());
        for (token, kind) in candidates {
            let key = HandlerKey::new(self.queue_url.clone(), token, kind);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(queue={}, service_token={}, resource_type={})",
            self.queue_url,
            self.service_token.as_deref().unwrap_or("*"),
            self.resource_type.as_deref().unwrap_or("*")
        )
    }
}
