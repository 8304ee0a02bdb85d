//! RAG, streaming, and orchestration sections.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Top-k facts fetched per injection.
    #[serde(default = "d_top_k")]
    pub top_k: u32,
    /// Minimum similarity for a fact to qualify.
    #[serde(default = "d_similarity_threshold")]
    pub similarity_threshold: f64,
    /// TTL of the per-(conv, turn, agent, message) context cache.
    #[serde(default = "d_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Recency weight before the late-turn switch.
    #[serde(default = "d_early_weight")]
    pub early_recency_weight: f64,
    /// Recency weight from `history_after_turn` onward.
    #[serde(default = "d_late_weight")]
    pub late_recency_weight: f64,
    /// Turn sequence at which condensed history joins the context block.
    #[serde(default = "d_history_after_turn")]
    pub history_after_turn: u32,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: d_top_k(),
            similarity_threshold: d_similarity_threshold(),
            cache_ttl_secs: d_cache_ttl(),
            early_recency_weight: d_early_weight(),
            late_recency_weight: d_late_weight(),
            history_after_turn: d_history_after_turn(),
        }
    }
}

fn d_top_k() -> u32 {
    5
}

fn d_similarity_threshold() -> f64 {
    0.3
}

fn d_cache_ttl() -> u64 {
    60
}

fn d_early_weight() -> f64 {
    0.3
}

fn d_late_weight() -> f64 {
    0.4
}

fn d_history_after_turn() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Bounded per-subscriber buffer; overflow drops the subscriber.
    #[serde(default = "d_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// Idle heartbeat interval (spec cap: 30 s).
    #[serde(default = "d_heartbeat")]
    pub heartbeat_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self { subscriber_buffer: d_subscriber_buffer(), heartbeat_secs: d_heartbeat() }
    }
}

fn d_subscriber_buffer() -> usize {
    64
}

fn d_heartbeat() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Model used when neither agent nor request picks one (`DEFAULT_MODEL`).
    #[serde(default)]
    pub default_model: String,
    /// Agent descriptor directory (`AGENTS_DIR`).
    #[serde(default)]
    pub agents_dir: PathBuf,
    /// Upper bound on turns per orchestration (`AUTOGEN_MAX_TURNS`).
    #[serde(default = "d_max_turns")]
    pub max_turns: u32,
    /// Whole-request deadline (`AUTOGEN_TIMEOUT_SECONDS`).
    #[serde(default = "d_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Tool-result feedback loops allowed within one turn.
    #[serde(default = "d_max_tool_continuations")]
    pub max_tool_continuations: u32,
    /// Tool arguments are truncated to this many bytes in events.
    #[serde(default = "d_tool_arg_preview")]
    pub tool_arg_preview_len: usize,
    /// Swarm convergence: consecutive turns without new decisions or tools.
    #[serde(default = "d_convergence_window")]
    pub swarm_convergence_window: u32,
    /// Regexes over the request message that force the HITL gate.
    #[serde(default)]
    pub approval_patterns: Vec<String>,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            default_model: String::new(),
            agents_dir: PathBuf::new(),
            max_turns: d_max_turns(),
            timeout_seconds: d_timeout_seconds(),
            max_tool_continuations: d_max_tool_continuations(),
            tool_arg_preview_len: d_tool_arg_preview(),
            swarm_convergence_window: d_convergence_window(),
            approval_patterns: Vec::new(),
        }
    }
}

fn d_max_turns() -> u32 {
    10
}

fn d_timeout_seconds() -> u64 {
    120
}

fn d_max_tool_continuations() -> u32 {
    3
}

fn d_tool_arg_preview() -> usize {
    200
}

fn d_convergence_window() -> u32 {
    2
}
