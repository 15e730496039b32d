//! Raw handler options as read from a configuration section.

use std::collections::HashMap;

pub const OPTION_QUEUE_URL: &str = "queue_url";
pub const OPTION_REGION: &str = "region";
pub const OPTION_SERVICE_TOKEN: &str = "service_token";
pub const OPTION_RESOURCE_TYPE: &str = "resource_type";
pub const OPTION_FLATTEN: &str = "flatten";
pub const OPTION_DEFAULT_ACTION: &str = "default_action";
pub const OPTION_CREATE_ACTION: &str = "create_action";
pub const OPTION_UPDATE_ACTION: &str = "update_action";
pub const OPTION_DELETE_ACTION: &str = "delete_action";
pub const OPTION_TIMEOUT: &str = "timeout";
pub const OPTION_CREATE_TIMEOUT: &str = "create_timeout";
pub const OPTION_UPDATE_TIMEOUT: &str = "update_timeout";
pub const OPTION_DELETE_TIMEOUT: &str = "delete_timeout";

/// One handler section before validation.
///
/// Every option is kept as the literal string from the configuration;
/// [`ResourceHandler::from_definition`](super::ResourceHandler::from_definition)
/// interprets and validates them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerDefinition {
    /// Section name, used in diagnostics and logs.
    pub name: String,
    /// Where the section was defined, usually a file path.
    pub source: String,
    pub queue_url: Option<String>,
    pub region: Option<String>,
    pub service_token: Option<String>,
    pub resource_type: Option<String>,
    pub flatten: Option<String>,
    pub default_action: Option<String>,
    pub create_action: Option<String>,
    pub update_action: Option<String>,
    pub delete_action: Option<String>,
    pub timeout: Option<String>,
    pub create_timeout: Option<String>,
    pub update_timeout: Option<String>,
    pub delete_timeout: Option<String>,
}

impl HandlerDefinition {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            ..Default::default()
        }
    }

    /// Builds a definition from option name/value pairs.
    ///
    /// Option names are matched case-insensitively; unknown options are
    /// ignored.
    pub fn from_options(
        name: impl Into<String>,
        source: impl Into<String>,
        options: &HashMap<String, String>,
    ) -> Self {
        options
            .iter()
            .fold(Self::new(name, source), |definition, (key, value)| {
                definition.with_option(key, value.clone())
            })
    }

    /// Sets a single option by name.
    pub fn with_option(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = Some(value.into());
        match key.to_ascii_lowercase().as_str() {
            OPTION_QUEUE_URL => self.queue_url = value,
            OPTION_REGION => self.region = value,
            OPTION_SERVICE_TOKEN => self.service_token = value,
            OPTION_RESOURCE_TYPE => self.resource_type = value,
            OPTION_FLATTEN => self.flatten = value,
            OPTION_DEFAULT_ACTION => self.default_action = value,
            OPTION_CREATE_ACTION => self.create_action = value,
            OPTION_UPDATE_ACTION => self.update_action = value,
            OPTION_DELETE_ACTION => self.delete_action = value,
            OPTION_TIMEOUT => self.timeout = value,
            OPTION_CREATE_TIMEOUT => self.create_timeout = value,
            OPTION_UPDATE_TIMEOUT => self.update_timeout = value,
            OPTION_DELETE_TIMEOUT => self.delete_timeout = value,
            _ => {}
        }
        self
    }
}
