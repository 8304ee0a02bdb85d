//! The `orch` command line.
//!
//! `serve` runs the service; the administrative subcommands talk to a
//! running server over the admin HTTP API. Exit codes: 0 success,
//! 2 config error, 3 backend unavailable, 4 policy denial, 1 other.

use clap::{Parser, Subcommand};

pub mod client;

pub const EXIT_OK: u8 = 0;
pub const EXIT_OTHER: u8 = 1;
pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_BACKEND: u8 = 3;
pub const EXIT_POLICY: u8 = 4;

#[derive(Debug, Parser)]
#[command(name = "orch", about = "Multi-agent conversation orchestrator")]
pub struct Cli {
    /// Base URL of a running server (admin commands).
    #[arg(long, global = true, env = "ORCH_SERVER", default_value = "http://127.0.0.1:8642")]
    pub server: String,

    /// Optional TOML config file (pricing, flags, workflows).
    #[arg(long, global = true, env = "ORCH_CONFIG")]
    pub config: Option<std::path::PathBuf>,

    /// Admin bearer token for the admin commands.
    #[arg(long, global = true, env = "ORCH_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the service (default).
    Serve,
    /// Ask the running server to reload the agent registry.
    ReloadAgents,
    /// Feature flag administration.
    Flag {
        #[command(subcommand)]
        command: FlagCommand,
    },
    /// Circuit breaker administration.
    Breaker {
        #[command(subcommand)]
        command: BreakerCommand,
    },
    /// Cost aggregates.
    Cost {
        #[command(subcommand)]
        command: CostCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum FlagCommand {
    /// Set a flag: `orch flag set per_turn_rag percentage --percentage 25`.
    Set {
        name: String,
        /// off | on | percentage | user_whitelist | group_whitelist |
        /// gradual | canary | ab_test
        strategy: String,
        #[arg(long)]
        percentage: Option<f64>,
        /// Whitelisted user (repeatable).
        #[arg(long = "user")]
        users: Vec<String>,
        /// Whitelisted group (repeatable).
        #[arg(long = "group")]
        groups: Vec<String>,
        /// A/B variant name (repeatable).
        #[arg(long = "variant")]
        variants: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum BreakerCommand {
    /// Emergency override: force the circuit closed for a bounded time.
    Override {
        code: String,
        /// Duration in seconds.
        duration_secs: i64,
    },
    /// Show circuit state and recent alerts.
    Status,
}

#[derive(Debug, Subcommand)]
pub enum CostCommand {
    /// Print the daily aggregate.
    Daily {
        /// Date as YYYY-MM-DD; today when absent.
        #[arg(long)]
        date: Option<String>,
    },
}
