//! Admin API — bearer-token guarded operational surface.
//!
//! Dev mode (no token configured) leaves the endpoints open; production
//! sets the token env var named in `server.admin_token_env`.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use orch_domain::config::FlagSpec;
use orch_flags::FeatureFlag;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/breaker", get(breaker_status))
        .route("/breaker/override", post(breaker_override))
        .route("/agents/reload", post(agents_reload))
        .route("/flags", get(flags_list).post(flags_set))
        .route("/cost/daily", get(cost_daily))
        .route("/cost/conversations/:id", get(cost_conversation))
}

// ── Guard ────────────────────────────────────────────────────────────

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.admin_token_hash else {
        return true; // dev mode
    };
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) => Sha256::digest(token.as_bytes()).as_slice() == expected.as_slice(),
        None => false,
    }
}

macro_rules! guard {
    ($state:expr, $headers:expr) => {
        if !authorized(&$state, &$headers) {
            return (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({ "error": "admin token required" })),
            );
        }
    };
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>, headers: HeaderMap) -> (StatusCode, Json<serde_json::Value>) {
    guard!(state, headers);
    let snapshot = state.breaker.snapshot();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "agents": state.agents.len(),
            "providers": state.models.providers(),
            "circuit": snapshot.state,
            "activeTopics": state.hub.active_topics().len(),
        })),
    )
}

async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> (StatusCode, Json<serde_json::Value>) {
    guard!(state, headers);
    let mut snapshot = state.obs.metrics().snapshot();
    snapshot["flagUsage"] = serde_json::json!(state.flags.usage());
    (StatusCode::OK, Json(snapshot))
}

async fn breaker_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<serde_json::Value>) {
    guard!(state, headers);
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "circuit": state.breaker.snapshot(),
            "recentAlerts": state.breaker.alerts_since(0),
        })),
    )
}

#[derive(Deserialize)]
struct OverrideBody {
    code: String,
    #[serde(rename = "durationSecs")]
    duration_secs: i64,
}

async fn breaker_override(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<OverrideBody>,
) -> (StatusCode, Json<serde_json::Value>) {
    guard!(state, headers);
    match state
        .breaker
        .emergency_override(&body.code, chrono::Duration::seconds(body.duration_secs))
    {
        Ok(expires_at) => (
            StatusCode::OK,
            Json(serde_json::json!({ "active": true, "expiresAt": expires_at })),
        ),
        Err(e) => (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": e.to_string(), "kind": e.kind() })),
        ),
    }
}

async fn agents_reload(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<serde_json::Value>) {
    guard!(state, headers);
    match state.agents.reload() {
        Ok(count) => (StatusCode::OK, Json(serde_json::json!({ "agents": count }))),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

async fn flags_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<serde_json::Value>) {
    guard!(state, headers);
    (
        StatusCode::OK,
        Json(serde_json::json!({ "flags": state.flags.list() })),
    )
}

async fn flags_set(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(spec): Json<FlagSpec>,
) -> (StatusCode, Json<serde_json::Value>) {
    guard!(state, headers);
    match FeatureFlag::from_spec(&spec) {
        Ok(flag) => {
            state.flags.upsert(flag.clone());
            (StatusCode::OK, Json(serde_json::json!(flag)))
        }
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

async fn cost_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::extract::Path(id): axum::extract::Path<uuid::Uuid>,
) -> (StatusCode, Json<serde_json::Value>) {
    guard!(state, headers);
    match state.ledger.conversation_analytics(id).await {
        Ok(analytics) => (StatusCode::OK, Json(serde_json::json!(analytics))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

#[derive(Deserialize)]
struct DailyQuery {
    date: Option<String>,
}

async fn cost_daily(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DailyQuery>,
) -> (StatusCode, Json<serde_json::Value>) {
    guard!(state, headers);
    let date = match &query.date {
        Some(raw) => match chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": format!("bad date: {raw}") })),
                )
            }
        },
        None => chrono::Utc::now().date_naive(),
    };
    match state.ledger.daily_total(date).await {
        Ok(total) => {
            let limit = state.ledger.budget().daily_limit_usd;
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "date": date.to_string(),
                    "totalCostUSD": total,
                    "limitUSD": limit,
                    "utilization": total.utilization(limit),
                })),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}
