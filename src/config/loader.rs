//! Handler definitions from INI files.
//!
//! Layout of a configuration directory:
//!
//! ```text
//! <config_dir>/cfn-resource-bridge.conf   optional
//! <config_dir>/bridge.d/*.conf            optional, loaded in name order
//! ```
//!
//! At least one file must exist and together they must define at least one
//! section. Each section is one handler; the file path becomes its source
//! label.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use ini::{Ini, ParseOption};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::handler::HandlerDefinition;

/// Main configuration file name.
pub const CONFIG_FILE_NAME: &str = "cfn-resource-bridge.conf";

/// Directory holding additional handler files.
pub const BRIDGES_DIR_NAME: &str = "bridge.d";

/// Extension of handler files inside [`BRIDGES_DIR_NAME`].
pub const CONFIG_EXTENSION: &str = "conf";

/// Lists the configuration files under `config_dir`, main file first.
///
/// # Errors
///
/// Returns `NoConfigurationFiles` when neither the main file nor any
/// `bridge.d/*.conf` exists.
pub fn find_config_files(config_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let config_file = config_dir.join(CONFIG_FILE_NAME);
    let bridges_dir = config_dir.join(BRIDGES_DIR_NAME);

    let mut files = Vec::new();
    if config_file.is_file() {
        files.push(config_file.clone());
    }

    if bridges_dir.is_dir() {
        let mut hooks: Vec<PathBuf> = fs::read_dir(&bridges_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|ext| ext.to_str()) == Some(CONFIG_EXTENSION)
            })
            .collect();
        hooks.sort();
        files.extend(hooks);
    }

    if files.is_empty() {
        return Err(ConfigError::NoConfigurationFiles {
            config_file,
            bridges_dir,
        });
    }

    Ok(files)
}

/// Parses every section of one INI file into a handler definition.
///
/// Values are taken verbatim: quotes and backslashes are left for the shell.
/// Sections come back in file order; a repeated section merges into the
/// first, later options winning. Option names are case-insensitive.
pub fn parse_config_file(path: &Path) -> Result<Vec<HandlerDefinition>, ConfigError> {
    let options = ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    };
    let ini = Ini::load_from_file_opt(path, options).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let source = path.display().to_string();
    let mut sections: Vec<(String, HashMap<String, String>)> = Vec::new();
    for (name, properties) in ini.iter() {
        let Some(name) = name else {
            for (key, _) in properties.iter() {
                warn!(path = %source, option = %key, "Ignoring option outside of any section");
            }
            continue;
        };

        let index = match sections.iter().position(|(existing, _)| existing == name) {
            Some(index) => index,
            None => {
                sections.push((name.to_string(), HashMap::new()));
                sections.len() - 1
            }
        };
        for (key, value) in properties.iter() {
            sections[index]
                .1
                .insert(key.to_ascii_lowercase(), value.to_string());
        }
    }

    let definitions = sections
        .into_iter()
        .map(|(name, options)| {
            debug!(path = %source, section = %name, "Loaded handler section");
            HandlerDefinition::from_options(name, source.clone(), &options)
        })
        .collect();

    Ok(definitions)
}

/// Loads every handler definition under `config_dir`.
///
/// # Errors
///
/// Fails when no configuration file exists, a file cannot be parsed, or no
/// file defines a section.
pub fn load_handler_definitions(config_dir: &Path) -> Result<Vec<HandlerDefinition>, ConfigError> {
    let files = find_config_files(config_dir)?;

    let mut definitions = Vec::new();
    for file in &files {
        definitions.extend(parse_config_file(file)?);
    }

    if definitions.is_empty() {
        return Err(ConfigError::NoResources(files));
    }

    Ok(definitions)
}
