//! Runtime settings and handler configuration loading.

pub mod loader;

pub use loader::{
    find_config_files, load_handler_definitions, parse_config_file, BRIDGES_DIR_NAME,
    CONFIG_FILE_NAME,
};

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::handler::ResourceHandler;
use crate::scheduler::{DEFAULT_MAX_MESSAGES, DEFAULT_WAIT_TIME};
use crate::utils::retry::DEFAULT_MAX_ATTEMPTS;

/// Default configuration directory.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/cfn";

/// Settings for one bridge process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Directory holding `cfn-resource-bridge.conf` and `bridge.d/`.
    pub config_dir: PathBuf,
    /// Fixed worker count; derived from the queue count when unset.
    pub threads: Option<usize>,
    /// Long-poll wait per receive call.
    pub wait_time: Duration,
    /// Messages requested per receive call.
    pub max_messages: u32,
    /// Delivery attempts per callback.
    pub callback_attempts: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            threads: None,
            wait_time: DEFAULT_WAIT_TIME,
            max_messages: DEFAULT_MAX_MESSAGES,
            callback_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BridgeConfig {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_max_messages(mut self, max_messages: u32) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_callback_attempts(mut self, attempts: u32) -> Self {
        self.callback_attempts = attempts;
        self
    }

    /// Loads and validates every handler under the configuration directory.
    ///
    /// # Errors
    ///
    /// Returns the first loading or validation failure.
    pub fn load_handlers(&self) -> Result<Vec<ResourceHandler>, ConfigError> {
        load_handler_definitions(&self.config_dir)?
            .into_iter()
            .map(ResourceHandler::from_definition)
            .collect()
    }
}
