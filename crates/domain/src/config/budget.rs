//! Budget, circuit-breaker, and retry sections.

use serde::{Deserialize, Serialize};

use crate::money::Money;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Process-wide daily spend limit (from `DAILY_BUDGET_USD`).
    #[serde(default)]
    pub daily_limit_usd: Money,
    /// Per-conversation spend limit (from `AUTOGEN_COST_LIMIT_USD`).
    #[serde(default = "d_conversation_limit")]
    pub conversation_limit_usd: Money,
    /// Utilization fraction at which status becomes `warning`.
    #[serde(default = "d_warning")]
    pub warning_threshold: f64,
    /// Utilization fraction at which status becomes `critical`.
    #[serde(default = "d_critical")]
    pub critical_threshold: f64,
    /// A turn costing this multiple of the conversation's rolling mean
    /// counts as a cost spike (fed to the breaker as a failure).
    #[serde(default = "d_spike_multiplier")]
    pub spike_multiplier: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit_usd: Money::ZERO,
            conversation_limit_usd: d_conversation_limit(),
            warning_threshold: d_warning(),
            critical_threshold: d_critical(),
            spike_multiplier: d_spike_multiplier(),
        }
    }
}

fn d_conversation_limit() -> Money {
    Money::parse("5.0").unwrap_or(Money::ZERO)
}

fn d_warning() -> f64 {
    0.7
}

fn d_critical() -> f64 {
    0.9
}

fn d_spike_multiplier() -> f64 {
    5.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive-failure count that opens the circuit.
    #[serde(default = "d_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds in `open` before probing with `half_open`.
    #[serde(default = "d_recovery_timeout")]
    pub recovery_timeout_secs: u64,
    /// Probe budget while `half_open`.
    #[serde(default = "d_half_open_max")]
    pub half_open_max_calls: u32,
    /// Interval of the periodic re-evaluation task.
    #[serde(default = "d_check_interval")]
    pub check_interval_secs: u64,
    /// Accepted emergency override codes (operator-issued).
    #[serde(default)]
    pub override_codes: Vec<String>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: d_failure_threshold(),
            recovery_timeout_secs: d_recovery_timeout(),
            half_open_max_calls: d_half_open_max(),
            check_interval_secs: d_check_interval(),
            override_codes: Vec::new(),
        }
    }
}

fn d_failure_threshold() -> u32 {
    3
}

fn d_recovery_timeout() -> u64 {
    300
}

fn d_half_open_max() -> u32 {
    2
}

fn d_check_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "d_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on a single backoff delay and on the total delay budget.
    #[serde(default = "d_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: d_max_attempts(),
            base_delay_ms: d_base_delay_ms(),
            max_delay_ms: d_max_delay_ms(),
        }
    }
}

fn d_max_attempts() -> u32 {
    3
}

fn d_base_delay_ms() -> u64 {
    200
}

fn d_max_delay_ms() -> u64 {
    5_000
}
