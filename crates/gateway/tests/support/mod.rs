//! Shared fixtures for the gateway integration tests: a descriptor
//! directory with the default cabinet, a config wired to the in-memory
//! backend, and an `AppState` backed by the scripted model client.

use std::io::Write;
use std::sync::Arc;

use orch_domain::config::Config;
use orch_domain::Money;
use orch_gateway::bootstrap::{build_state, Collaborators};
use orch_gateway::runtime::tools::ToolRegistry;
use orch_gateway::state::AppState;
use orch_memory::StaticMemoryStore;
use orch_providers::{MockModelClient, ProviderRegistry, ScriptedTurn};

pub const PROVIDER: &str = "openai";
pub const MODEL: &str = "gpt-3.5-turbo";

pub fn write_agent(dir: &std::path::Path, file: &str, id: &str, tags: &str, tools: &str) {
    let mut f = std::fs::File::create(dir.join(file)).unwrap();
    write!(
        f,
        "id: {id}\ndisplayName: {id}\ndefaultModel: {PROVIDER}/{MODEL}\ncostTier: mid\n\
         capabilityTags: {tags}\ntoolIDs: {tools}\n---\nYou are {id}. Answer concisely."
    )
    .unwrap();
}

/// The default cabinet used across scenarios.
pub fn agents_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_agent(dir.path(), "ali.agent", "ali_chief_of_staff", "strategy, coordination", "");
    write_agent(dir.path(), "amy.agent", "amy_cfo", "finance, budget, forecasting", "web_search");
    write_agent(dir.path(), "luca.agent", "luca_security_expert", "security, risk, compliance", "");
    dir
}

pub fn test_config(agents_dir: &std::path::Path, daily_limit: &str) -> Config {
    let mut config = Config::default();
    config.state.redis_url = "memory://".into();
    config.orchestration.agents_dir = agents_dir.to_path_buf();
    config.orchestration.default_model = format!("{PROVIDER}/{MODEL}");
    config.budget.daily_limit_usd = Money::parse(daily_limit).unwrap();
    config
}

pub struct Fixture {
    pub state: AppState,
    pub client: Arc<MockModelClient>,
    pub memory: Arc<StaticMemoryStore>,
    // Held so the descriptor directory outlives the registry.
    _agents_dir: tempfile::TempDir,
}

pub fn fixture(script: Vec<ScriptedTurn>, daily_limit: &str) -> Fixture {
    fixture_with(script, daily_limit, |_| {})
}

pub fn fixture_with(
    script: Vec<ScriptedTurn>,
    daily_limit: &str,
    tweak: impl FnOnce(&mut Config),
) -> Fixture {
    let dir = agents_dir();
    let mut config = test_config(dir.path(), daily_limit);
    tweak(&mut config);

    let client = Arc::new(MockModelClient::new(PROVIDER, MODEL, script));
    let mut models = ProviderRegistry::new();
    models.register(client.clone());

    let memory = Arc::new(StaticMemoryStore::new());

    let state = build_state(
        Arc::new(config),
        Collaborators {
            models: Some(models),
            memory: Some(memory.clone()),
            tools: Some(ToolRegistry::new()),
        },
    )
    .unwrap();

    Fixture {
        state,
        client,
        memory,
        _agents_dir: dir,
    }
}

/// Drain every frame currently buffered on a subscription.
pub fn drain_frames(
    rx: &mut tokio::sync::mpsc::Receiver<orch_gateway::streaming::Frame>,
) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push((*frame).clone());
    }
    frames
}

/// Index of the first frame with the given `type`, if any.
pub fn position_of(frames: &[serde_json::Value], kind: &str) -> Option<usize> {
    frames.iter().position(|f| f["type"] == kind)
}
