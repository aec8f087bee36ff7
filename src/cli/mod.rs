//! CLI module for reconcile
//!
//! Subcommands:
//! - `reconcile plan` - Dry-run the patch planner over two documents
//! - `reconcile await` - Poll resource URLs until they converge
//! - `reconcile kinds` - Show the resource-kind catalog

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::CONFIG_ENV_VAR;
use crate::kinds::{Operation, ResourceKind};

mod commands;
mod display;

pub use commands::*;
pub use display::*;

/// Environment variable holding the bearer token for `await`
pub const TOKEN_ENV_VAR: &str = "RECONCILE_TOKEN";

#[derive(Parser, Debug)]
#[command(name = "reconcile")]
#[command(about = "Plan safe resource updates and wait for them to converge")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: ~/.reconcile/config.yaml)
    #[arg(long, global = true, env = CONFIG_ENV_VAR, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Path to a .env file loaded before running the command
    #[arg(long, global = true, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the patch an update would send, or why it would be rejected
    Plan(PlanArgs),

    /// Poll one or more resource URLs until they reach a target state
    Await(AwaitArgs),

    /// List resource kinds with their states and field rules
    Kinds(KindsArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Arguments for the plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Resource kind whose field rules apply
    #[arg(short, long, value_enum)]
    pub kind: ResourceKind,

    /// Desired configuration (JSON or YAML)
    #[arg(long, value_name = "FILE")]
    pub desired: PathBuf,

    /// Last observed state (JSON or YAML)
    #[arg(long, value_name = "FILE")]
    pub observed: PathBuf,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

/// Arguments for the await command
#[derive(Parser, Debug)]
pub struct AwaitArgs {
    /// Resource URLs to poll; all are polled concurrently
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<String>,

    /// Resource kind, selects the pending and target states
    #[arg(short, long, value_enum)]
    pub kind: ResourceKind,

    /// Operation being waited on
    #[arg(long, value_enum, default_value_t = Operation::Create)]
    pub operation: Operation,

    /// JSON pointer to the state tag in the response body
    #[arg(long, value_name = "POINTER")]
    pub state_pointer: Option<String>,

    /// Bearer token sent with every request
    #[arg(long, env = TOKEN_ENV_VAR, hide_env_values = true)]
    pub token: Option<String>,

    /// Override the poll interval (milliseconds)
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Override the overall timeout (seconds)
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

impl AwaitArgs {
    /// Fill a missing token from an environment read made after parsing.
    /// clap resolves `env` during parsing, before `--env-file` is loaded.
    pub fn with_token_fallback(mut self, token: Option<String>) -> Self {
        if self.token.is_none() {
            self.token = token;
        }
        self
    }
}

/// Arguments for the kinds command
#[derive(Parser, Debug)]
pub struct KindsArgs {
    /// Show field rules for a single kind
    #[arg(value_enum)]
    pub kind: Option<ResourceKind>,
}
