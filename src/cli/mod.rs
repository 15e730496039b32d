//! Command-line interface for cfn-resource-bridge.
//!
//! Provides the `run` command that starts the bridge and the `validate`
//! command that checks handler configuration.

mod commands;

pub use commands::{
    load_registry, parse_cli, run_with_cli, Cli, Commands, ConfigArgs, RunArgs,
    ValidateArgs,
};
