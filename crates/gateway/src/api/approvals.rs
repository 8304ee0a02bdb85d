//! Approval endpoints — how a human resolves HITL holds.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use uuid::Uuid;

use orch_domain::Error;

use crate::state::AppState;

pub async fn list_pending(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "pending": state.approvals.list_pending() }))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.approvals.get(id).await {
        Ok(Some(approval)) => (StatusCode::OK, Json(serde_json::json!(approval))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "approval not found" })),
        ),
        Err(e) => error_response(e),
    }
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    resolve(state, id, true).await
}

pub async fn deny(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    resolve(state, id, false).await
}

async fn resolve(state: AppState, id: Uuid, approve: bool) -> (StatusCode, Json<serde_json::Value>) {
    match state.approvals.resolve(id, approve).await {
        Ok(approval) => (StatusCode::OK, Json(serde_json::json!(approval))),
        Err(e) => error_response(e),
    }
}

fn error_response(e: Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e.kind() {
        "invalid_input" => StatusCode::NOT_FOUND,
        "conflict" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string(), "kind": e.kind() })))
}
