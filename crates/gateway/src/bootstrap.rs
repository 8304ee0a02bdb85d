//! Startup wiring: build the immutable service container once, then pass
//! it explicitly to every component. No module-level singletons.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use orch_breaker::CircuitBreaker;
use orch_context::RagInjector;
use orch_domain::config::Config;
use orch_domain::{Error, Result};
use orch_flags::{FeatureFlag, FlagStore, Strategy};
use orch_ledger::{CostLedger, PricingTable};
use orch_memory::MemoryStore;
use orch_providers::{MockModelClient, ProviderRegistry};
use orch_statestore::{backend, StateStore, StoreTtls};

use crate::observability::{MetricsCollector, Observability};
use crate::runtime::approval::ApprovalGate;
use crate::runtime::cancel::CancelMap;
use crate::runtime::convo_lock::ConvoLockMap;
use crate::runtime::tools::ToolRegistry;
use crate::state::AppState;
use crate::streaming::StreamingHub;

/// Collaborators the embedding application injects. Defaults keep the
/// process self-contained: a scripted echo model client and the
/// in-memory fact store.
#[derive(Default)]
pub struct Collaborators {
    pub models: Option<ProviderRegistry>,
    pub memory: Option<Arc<dyn MemoryStore>>,
    pub tools: Option<ToolRegistry>,
}

/// Flags the runtime consults get a seed unless the config names them.
fn seed_default_flags(store: &FlagStore) {
    for name in [
        orch_flags::names::PER_TURN_RAG,
        orch_flags::names::HITL_APPROVAL,
        orch_flags::names::SWARM_PATTERN,
        orch_flags::names::SELECTION_EVENTS,
    ] {
        if store.get(name).is_none() {
            store.upsert(FeatureFlag {
                name: name.to_string(),
                enabled: true,
                strategy: Strategy::On,
                updated_at: chrono::Utc::now(),
                depends_on: Vec::new(),
                conflicts_with: Vec::new(),
            });
        }
    }
}

pub fn build_state(config: Arc<Config>, collaborators: Collaborators) -> Result<AppState> {
    // ── Persistence ───────────────────────────────────────────────────
    let kv = backend::from_url(&config.state.redis_url)?;
    let store = Arc::new(StateStore::new(kv, StoreTtls::from(&config.state)));

    // ── Delivery ──────────────────────────────────────────────────────
    let hub = Arc::new(StreamingHub::new(config.streaming.subscriber_buffer));
    let metrics = Arc::new(MetricsCollector::new());
    let obs = Arc::new(Observability::new(hub.clone(), metrics));

    // ── Policy ────────────────────────────────────────────────────────
    let flags = Arc::new(FlagStore::from_specs(&config.flags)?);
    seed_default_flags(&flags);

    let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone(), obs.clone()));

    let pricing = if config.pricing.is_empty() {
        PricingTable::builtin()
    } else {
        PricingTable::from_specs(&config.pricing)?
    };
    let ledger = Arc::new(CostLedger::new(
        pricing,
        store.clone(),
        config.budget.clone(),
        obs.clone(),
    ));

    // ── Agents & models ───────────────────────────────────────────────
    let agents = Arc::new(orch_agents::AgentRegistry::load(
        config.orchestration.agents_dir.clone(),
    )?);

    // HITL-sensitive action patterns, compiled once at startup.
    let approval_patterns = Arc::new(
        regex::RegexSet::new(&config.orchestration.approval_patterns)
            .map_err(|e| Error::Config(format!("approval_patterns: {e}")))?,
    );

    let models = Arc::new(collaborators.models.unwrap_or_else(|| {
        let provider = config
            .orchestration
            .default_model
            .split('/')
            .next()
            .filter(|p| !p.is_empty())
            .unwrap_or("local");
        let model = config
            .orchestration
            .default_model
            .split_once('/')
            .map(|(_, m)| m)
            .unwrap_or("echo-1");
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockModelClient::echo(provider, model)));
        tracing::warn!(
            provider,
            "no model clients injected; the scripted echo client is serving"
        );
        registry
    }));
    if models.is_empty() {
        return Err(Error::Config("no model clients registered".into()));
    }

    let memory = collaborators
        .memory
        .unwrap_or_else(|| Arc::new(orch_memory::StaticMemoryStore::new()));
    let rag = Arc::new(RagInjector::new(memory, config.rag.clone()));
    let tools = Arc::new(collaborators.tools.unwrap_or_default());

    // ── Security ──────────────────────────────────────────────────────
    let admin_token_hash = std::env::var(&config.server.admin_token_env)
        .ok()
        .filter(|t| !t.is_empty())
        .map(|t| Sha256::digest(t.as_bytes()).to_vec());

    let approvals = Arc::new(ApprovalGate::new(store.clone()));

    Ok(AppState {
        config,
        flags,
        breaker,
        ledger,
        store,
        convo_locks: Arc::new(ConvoLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
        approvals,
        agents,
        models,
        tools,
        rag,
        hub,
        obs,
        approval_patterns,
        admin_token_hash,
    })
}

/// Background maintenance: heartbeats and the breaker's periodic check.
/// Returns the task handles so a caller can abort them on shutdown.
pub fn spawn_background_tasks(state: AppState) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    // Stream heartbeats.
    {
        let state = state.clone();
        let interval = std::time::Duration::from_secs(state.config.streaming.heartbeat_secs.max(1));
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                state.hub.heartbeat_all();
            }
        }));
    }

    // Breaker periodic check against the live daily budget.
    {
        let state = state.clone();
        let interval = std::time::Duration::from_secs(state.config.breaker.check_interval_secs.max(1));
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let today = chrono::Utc::now().date_naive();
                let healthy = match state.ledger.daily_total(today).await {
                    Ok(total) => {
                        let limit = state.ledger.budget().daily_limit_usd;
                        limit.is_zero() || total < limit
                    }
                    Err(_) => false,
                };
                state.breaker.tick(healthy);
            }
        }));
    }

    // Process memory gauge.
    {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                ticker.tick().await;
                if let Some(bytes) = resident_memory_bytes() {
                    state.obs.metrics().set_memory_usage_bytes(bytes);
                }
            }
        }));
    }

    // Persist new circuit alerts to the state store.
    {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            let mut last_seq = 0u64;
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(15));
            loop {
                ticker.tick().await;
                for alert in state.breaker.alerts_since(last_seq) {
                    last_seq = alert.seq;
                    if let Ok(json) = serde_json::to_string(&alert) {
                        let ttl = state.store.ttls().daily_aggregate;
                        let _ = state
                            .store
                            .push_list(&orch_statestore::keys::circuit_alerts(), &json, Some(ttl))
                            .await;
                    }
                }
            }
        }));
    }

    handles
}

/// Resident set size from /proc (Linux); `None` elsewhere.
fn resident_memory_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096)
}
