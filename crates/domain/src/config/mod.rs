//! Configuration: environment variables at startup plus an optional TOML
//! file for tables that do not fit in an env var (pricing, flags, workflows).
//!
//! Required env vars are collected in one pass; startup aborts with a
//! structured error listing every absent name, not just the first.

mod budget;
mod pricing;
mod runtime;

pub use budget::*;
pub use pricing::*;
pub use runtime::*;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::money::Money;

/// Environment variable names read at startup.
pub const ENV_REDIS_URL: &str = "REDIS_URL";
pub const ENV_DEFAULT_MODEL: &str = "DEFAULT_MODEL";
pub const ENV_DAILY_BUDGET_USD: &str = "DAILY_BUDGET_USD";
pub const ENV_MAX_TURNS: &str = "AUTOGEN_MAX_TURNS";
pub const ENV_TIMEOUT_SECONDS: &str = "AUTOGEN_TIMEOUT_SECONDS";
pub const ENV_COST_LIMIT_USD: &str = "AUTOGEN_COST_LIMIT_USD";
pub const ENV_AGENTS_DIR: &str = "AGENTS_DIR";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    /// Append-only pricing table rows (interpreted by the cost ledger).
    #[serde(default)]
    pub pricing: Vec<PricingSpec>,
    /// Feature flag seeds (interpreted by the flag store).
    #[serde(default)]
    pub flags: Vec<FlagSpec>,
    /// Workflow graph definitions, keyed by workflow id.
    #[serde(default)]
    pub workflows: HashMap<String, WorkflowSpec>,
}

impl Config {
    /// Read the environment, then merge the optional TOML file.
    ///
    /// Returns every missing required variable at once.
    pub fn from_env(file: Option<&str>) -> Result<Config, EnvError> {
        let mut config = match file {
            Some(raw) => toml::from_str::<Config>(raw)
                .map_err(|e| EnvError::Parse(e.to_string()))?,
            None => Config::default(),
        };

        let mut missing = Vec::new();
        let mut require = |name: &'static str| -> String {
            match std::env::var(name) {
                Ok(v) if !v.trim().is_empty() => v,
                _ => {
                    missing.push(name);
                    String::new()
                }
            }
        };

        let redis_url = require(ENV_REDIS_URL);
        let default_model = require(ENV_DEFAULT_MODEL);
        let daily_budget = require(ENV_DAILY_BUDGET_USD);
        let agents_dir = require(ENV_AGENTS_DIR);

        if !missing.is_empty() {
            return Err(EnvError::Missing(missing));
        }

        config.state.redis_url = redis_url;
        config.orchestration.default_model = default_model;
        config.orchestration.agents_dir = agents_dir.into();
        config.budget.daily_limit_usd = Money::parse(&daily_budget).ok_or_else(|| {
            EnvError::Parse(format!("{ENV_DAILY_BUDGET_USD}: not a decimal: {daily_budget}"))
        })?;

        // Optional overrides.
        if let Ok(v) = std::env::var(ENV_MAX_TURNS) {
            config.orchestration.max_turns = v
                .parse()
                .map_err(|_| EnvError::Parse(format!("{ENV_MAX_TURNS}: not an integer: {v}")))?;
        }
        if let Ok(v) = std::env::var(ENV_TIMEOUT_SECONDS) {
            config.orchestration.timeout_seconds = v
                .parse()
                .map_err(|_| EnvError::Parse(format!("{ENV_TIMEOUT_SECONDS}: not an integer: {v}")))?;
        }
        if let Ok(v) = std::env::var(ENV_COST_LIMIT_USD) {
            config.budget.conversation_limit_usd = Money::parse(&v)
                .ok_or_else(|| EnvError::Parse(format!("{ENV_COST_LIMIT_USD}: not a decimal: {v}")))?;
        }

        Ok(config)
    }

    /// Cross-field validation. Errors abort startup; warnings are logged.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.budget.daily_limit_usd.is_zero() {
            issues.push(ConfigIssue::warning(
                "budget.daily_limit_usd is 0 — every turn will trip the budget breaker",
            ));
        }
        if self.budget.warning_threshold >= self.budget.critical_threshold {
            issues.push(ConfigIssue::error(
                "budget.warning_threshold must be below budget.critical_threshold",
            ));
        }
        if self.breaker.failure_threshold == 0 {
            issues.push(ConfigIssue::error("breaker.failure_threshold must be >= 1"));
        }
        if self.rag.top_k == 0 {
            issues.push(ConfigIssue::warning("rag.top_k is 0 — RAG will inject nothing"));
        }
        if self.streaming.subscriber_buffer == 0 {
            issues.push(ConfigIssue::error("streaming.subscriber_buffer must be >= 1"));
        }
        if self.orchestration.max_turns == 0 {
            issues.push(ConfigIssue::error("orchestration.max_turns must be >= 1"));
        }
        for (id, wf) in &self.workflows {
            if let Err(msg) = wf.check_shape() {
                issues.push(ConfigIssue::error(format!("workflow {id}: {msg}")));
            }
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server & state sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_bind_addr")]
    pub bind_addr: String,
    /// Env var holding the admin bearer token. Unset = admin open (dev mode).
    #[serde(default = "d_admin_token_env")]
    pub admin_token_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: d_bind_addr(), admin_token_env: d_admin_token_env() }
    }
}

fn d_bind_addr() -> String {
    "127.0.0.1:8642".into()
}

fn d_admin_token_env() -> String {
    "ORCH_ADMIN_TOKEN".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Backend selector. `memory://` runs the in-process engine.
    #[serde(default = "d_redis_url")]
    pub redis_url: String,
    /// TTL for conversation-scoped keys (seconds).
    #[serde(default = "d_conversation_ttl")]
    pub conversation_ttl_secs: u64,
    /// TTL for daily cost aggregates (seconds).
    #[serde(default = "d_daily_ttl")]
    pub daily_aggregate_ttl_secs: u64,
    /// TTL for per-turn detail (seconds).
    #[serde(default = "d_turn_ttl")]
    pub turn_detail_ttl_secs: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            redis_url: d_redis_url(),
            conversation_ttl_secs: d_conversation_ttl(),
            daily_aggregate_ttl_secs: d_daily_ttl(),
            turn_detail_ttl_secs: d_turn_ttl(),
        }
    }
}

fn d_redis_url() -> String {
    "memory://".into()
}

fn d_conversation_ttl() -> u64 {
    3600
}

fn d_daily_ttl() -> u64 {
    7 * 24 * 3600
}

fn d_turn_ttl() -> u64 {
    30 * 24 * 3600
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Issues & env errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    pub fn warning(message: impl Into<String>) -> Self {
        Self { severity: ConfigSeverity::Warning, message: message.into() }
    }
    pub fn error(message: impl Into<String>) -> Self {
        Self { severity: ConfigSeverity::Error, message: message.into() }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Startup environment failure.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("config parse: {0}")]
    Parse(String),
}
