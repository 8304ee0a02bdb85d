use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use orch_domain::config::{Config, ConfigSeverity, EnvError};
use orch_gateway::bootstrap;
use orch_gateway::cli::{
    client::AdminClient, BreakerCommand, Cli, Command, CostCommand, FlagCommand, EXIT_CONFIG,
    EXIT_OK, EXIT_OTHER,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let admin = AdminClient::new(&cli.server, cli.admin_token.clone());

    let code = match cli.command {
        None | Some(Command::Serve) => serve(&cli).await,
        Some(Command::ReloadAgents) => admin.reload_agents().await,
        Some(Command::Flag { command: FlagCommand::Set { name, strategy, percentage, users, groups, variants } }) => {
            let spec = orch_domain::config::FlagSpec {
                name,
                enabled: true,
                strategy,
                percentage,
                whitelist_users: users,
                whitelist_groups: groups,
                rollout_start: None,
                rollout_end: None,
                target_percentage: None,
                variants,
                depends_on: Vec::new(),
                conflicts_with: Vec::new(),
            };
            admin.flag_set(&spec).await
        }
        Some(Command::Breaker { command }) => match command {
            BreakerCommand::Override { code, duration_secs } => {
                admin.breaker_override(&code, duration_secs).await
            }
            BreakerCommand::Status => admin.breaker_status().await,
        },
        Some(Command::Cost { command: CostCommand::Daily { date } }) => {
            admin.cost_daily(date.as_deref()).await
        }
    };
    ExitCode::from(code)
}

/// Structured JSON tracing for the serve path.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,orch_gateway=debug")),
        )
        .json()
        .init();
}

async fn serve(cli: &Cli) -> u8 {
    init_tracing();

    // ── Configuration ────────────────────────────────────────────────
    let file = match &cli.config {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(raw) => Some(raw),
            Err(e) => {
                eprintln!("error: config file {}: {e}", path.display());
                return EXIT_CONFIG;
            }
        },
        None => None,
    };
    let config = match Config::from_env(file.as_deref()) {
        Ok(c) => Arc::new(c),
        Err(e @ EnvError::Missing(_)) | Err(e @ EnvError::Parse(_)) => {
            eprintln!("error: {e}");
            return EXIT_CONFIG;
        }
    };

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        eprintln!("error: config validation failed");
        return EXIT_CONFIG;
    }

    // ── Wiring ───────────────────────────────────────────────────────
    let state = match bootstrap::build_state(config.clone(), bootstrap::Collaborators::default()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: startup: {e}");
            return EXIT_CONFIG;
        }
    };

    match run_server(state, &config).await {
        Ok(()) => EXIT_OK,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_OTHER
        }
    }
}

async fn run_server(state: orch_gateway::state::AppState, config: &Config) -> anyhow::Result<()> {
    use anyhow::Context;

    let _background = bootstrap::spawn_background_tasks(state.clone());

    tracing::info!(
        addr = %config.server.bind_addr,
        agents = state.agents.len(),
        "orch serving"
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.server.bind_addr))?;
    let app = orch_gateway::api::router(state);
    axum::serve(listener, app).await.context("server")?;
    Ok(())
}
