use std::sync::Arc;

use orch_agents::AgentRegistry;
use orch_breaker::CircuitBreaker;
use orch_context::RagInjector;
use orch_domain::config::Config;
use orch_flags::FlagStore;
use orch_ledger::CostLedger;
use orch_providers::ProviderRegistry;
use orch_statestore::StateStore;

use crate::observability::Observability;
use crate::runtime::approval::ApprovalGate;
use crate::runtime::cancel::CancelMap;
use crate::runtime::convo_lock::ConvoLockMap;
use crate::runtime::tools::ToolRegistry;
use crate::streaming::StreamingHub;

/// Shared application state passed to every handler and runtime loop.
///
/// Built once at startup ([`crate::bootstrap::build_state`]); no
/// module-level singletons. Fields are grouped by concern:
/// - **Policy** — flags, breaker, ledger
/// - **Conversation substrate** — store, locks, cancellation, approvals
/// - **Agents & models** — registry, providers, tools, RAG
/// - **Delivery** — streaming hub, observability
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Policy ────────────────────────────────────────────────────────
    pub flags: Arc<FlagStore>,
    pub breaker: Arc<CircuitBreaker>,
    pub ledger: Arc<CostLedger>,

    // ── Conversation substrate ────────────────────────────────────────
    pub store: Arc<StateStore>,
    pub convo_locks: Arc<ConvoLockMap>,
    pub cancel_map: Arc<CancelMap>,
    pub approvals: Arc<ApprovalGate>,

    // ── Agents & models ───────────────────────────────────────────────
    pub agents: Arc<AgentRegistry>,
    pub models: Arc<ProviderRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub rag: Arc<RagInjector>,

    // ── Delivery ──────────────────────────────────────────────────────
    pub hub: Arc<StreamingHub>,
    pub obs: Arc<Observability>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// Messages matching any of these trigger the HITL gate even without
    /// an explicit `requiresApproval`. Compiled once at startup.
    pub approval_patterns: Arc<regex::RegexSet>,
    /// SHA-256 of the admin bearer token; `None` = dev mode (admin open).
    pub admin_token_hash: Option<Vec<u8>>,
}
