//! External command execution.
//!
//! Handlers describe their work as shell command lines. This module runs
//! them with a prepared environment and captures everything the bridge
//! needs to build a callback:
//!
//! ```text
//! command + env ──► ProcessRunner ──► ProcessOutput { exit_code, stdout, stderr }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cfn_resource_bridge::execution::{ProcessRunner, ShellProcessRunner};
//!
//! let runner = ShellProcessRunner::new();
//! let env = [("Event_RequestType".to_string(), "Create".to_string())].into();
//! let output = runner.run("echo $Event_RequestType", &env).await?;
//! assert_eq!(output.stdout.trim(), "Create");
//! ```

pub mod process;

pub use process::{ProcessOutput, ProcessRunner, ShellProcessRunner};
