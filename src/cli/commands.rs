//! CLI command definitions for cfn-resource-bridge.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::config::{BridgeConfig, DEFAULT_CONFIG_DIR};
use crate::error::BridgeError;
use crate::execution::ShellProcessRunner;
use crate::notification::{CallbackSender, HttpCallbackTransport};
use crate::queue::SqsTransport;
use crate::registry::{HandlerKey, HandlerRegistry};
use crate::scheduler::{TaskContext, WorkerPool, WorkerPoolConfig, MAX_MESSAGES_LIMIT};
use crate::utils::RetryPolicy;

/// Runs local commands for CloudFormation custom resources.
#[derive(Parser)]
#[command(name = "cfn-resource-bridge")]
#[command(about = "Bridge CloudFormation custom resource events to local commands")]
#[command(version)]
#[command(
    long_about = "cfn-resource-bridge polls queues subscribed to custom resource topics, runs the configured command for each Create, Update or Delete event, and reports the result back to CloudFormation.\n\nHandlers are read from <config-dir>/cfn-resource-bridge.conf and <config-dir>/bridge.d/*.conf.\n\nExample usage:\n  cfn-resource-bridge run --config-dir /etc/cfn"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true, env = "CFN_BRIDGE_LOG_LEVEL")]
    pub log_level: String,

    /// Append logs to this file instead of stderr.
    #[arg(long, global = true, env = "CFN_BRIDGE_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Start polling and processing events until interrupted.
    Run(RunArgs),

    /// Load all handlers, print the routing table and exit.
    Validate(ValidateArgs),
}

/// Arguments shared by every command that reads handler configuration.
#[derive(Parser, Debug, Clone)]
pub struct ConfigArgs {
    /// Directory holding cfn-resource-bridge.conf and bridge.d/.
    #[arg(short, long, default_value = DEFAULT_CONFIG_DIR, env = "CFN_BRIDGE_CONFIG_DIR")]
    pub config_dir: PathBuf,
}

/// Arguments for `cfn-resource-bridge validate`.
#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Print the routing table as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// One row of the routing table.
#[derive(Debug, Serialize)]
struct RouteSummary<'a> {
    #[serde(flatten)]
    key: &'a HandlerKey,
    handler: &'a str,
    source: &'a str,
    region: &'a str,
}

/// Arguments for `cfn-resource-bridge run`.
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Number of workers; defaults to queues + min(3 * queues, 10).
    #[arg(short, long, env = "CFN_BRIDGE_THREADS")]
    pub threads: Option<usize>,

    /// Long-poll wait in seconds.
    #[arg(long, default_value = "20", env = "CFN_BRIDGE_WAIT_TIME")]
    pub wait_time: u64,

    /// Messages requested per poll.
    #[arg(
        long,
        default_value = "1",
        env = "CFN_BRIDGE_MAX_MESSAGES",
        value_parser = clap::value_parser!(u32).range(1..=MAX_MESSAGES_LIMIT as i64)
    )]
    pub max_messages: u32,

    /// Delivery attempts per response before giving up.
    #[arg(long, default_value = "10", env = "CFN_BRIDGE_CALLBACK_ATTEMPTS")]
    pub callback_attempts: u32,
}

impl RunArgs {
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig::new(self.config.config_dir.clone())
            .with_threads(self.threads)
            .with_wait_time(Duration::from_secs(self.wait_time))
            .with_max_messages(self.max_messages)
            .with_callback_attempts(self.callback_attempts)
    }
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access logging arguments before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_bridge(args.bridge_config()).await,
        Commands::Validate(args) => {
            run_validate(&BridgeConfig::new(args.config.config_dir), args.json)
        }
    }
}

/// Loads and registers every handler under `config`'s directory.
pub fn load_registry(config: &BridgeConfig) -> Result<HandlerRegistry, BridgeError> {
    let handlers = config.load_handlers()?;
    Ok(HandlerRegistry::from_handlers(handlers)?)
}

// ============================================================================
// Command Implementation
// ============================================================================

async fn run_bridge(config: BridgeConfig) -> anyhow::Result<()> {
    let registry = Arc::new(load_registry(&config)?);
    info!(
        handlers = registry.len(),
        queues = registry.queues().len(),
        config_dir = %config.config_dir.display(),
        "Loaded handlers"
    );

    let regions: BTreeSet<&str> = registry
        .queues()
        .iter()
        .map(|queue| queue.region.as_str())
        .collect();
    let transport = Arc::new(SqsTransport::connect(regions).await);
    let callbacks = Arc::new(HttpCallbackTransport::new()?);
    let sender = CallbackSender::new(callbacks, RetryPolicy::new(config.callback_attempts));

    let context = TaskContext::new(
        transport,
        Arc::new(ShellProcessRunner::new()),
        sender,
        Arc::clone(&registry),
    )
    .with_wait_time(config.wait_time)
    .with_max_messages(config.max_messages);

    let mut pool = WorkerPool::new(
        WorkerPoolConfig::default().with_num_workers(config.threads),
        context,
    );
    pool.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");
    pool.shutdown().await?;

    Ok(())
}

fn run_validate(config: &BridgeConfig, json: bool) -> anyhow::Result<()> {
    let registry = load_registry(config)?;
    let routes: Vec<RouteSummary<'_>> = registry
        .entries()
        .into_iter()
        .map(|(key, handler)| RouteSummary {
            key,
            handler: handler.name(),
            source: handler.source(),
            region: handler.region(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&routes)?);
        return Ok(());
    }

    println!(
        "{} handler(s) on {} queue(s) from {}",
        registry.len(),
        registry.queues().len(),
        config.config_dir.display()
    );
    for route in &routes {
        println!("  {} => [{}] in '{}'", route.key, route.handler, route.source);
    }

    Ok(())
}
