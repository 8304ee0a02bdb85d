//! `POST /v1/orchestrate` and conversation cancellation.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::runtime::{OrchestrateOutcome, Orchestrator};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OrchestrateBody {
    pub message: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(default, rename = "conversationID")]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub context: crate::runtime::RequestContext,
}

fn status_for(outcome: &OrchestrateOutcome) -> StatusCode {
    match outcome {
        // Policy holds are non-error responses carrying the next step.
        OrchestrateOutcome::Ok(_)
        | OrchestrateOutcome::ApprovalRequired { .. }
        | OrchestrateOutcome::Cancelled(_) => StatusCode::OK,
        OrchestrateOutcome::Invalid { .. } => StatusCode::BAD_REQUEST,
        OrchestrateOutcome::ApprovalDenied { .. } => StatusCode::FORBIDDEN,
        OrchestrateOutcome::Busy
        | OrchestrateOutcome::CircuitOpen { .. }
        | OrchestrateOutcome::BudgetExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        OrchestrateOutcome::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn orchestrate(
    State(state): State<AppState>,
    Json(body): Json<OrchestrateBody>,
) -> impl IntoResponse {
    let outcome = Orchestrator::orchestrate(
        &state,
        crate::runtime::orchestrator::OrchestrateRequest {
            message: body.message,
            user_id: body.user_id,
            conversation_id: body.conversation_id,
            context: body.context,
        },
    )
    .await;

    let status = status_for(&outcome);
    let mut payload = serde_json::to_value(&outcome).unwrap_or_else(
        |_| serde_json::json!({ "status": "internal", "message": "unserializable outcome" }),
    );
    payload["kind"] = serde_json::json!(outcome.kind());
    (status, Json(payload))
}

/// `POST /v1/conversations/:id/cancel` — cooperative cancel; the running
/// loop finalizes the in-flight turn at the next chunk boundary.
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    if state.cancel_map.cancel(id) {
        (StatusCode::OK, Json(serde_json::json!({ "cancelled": true })))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "cancelled": false, "error": "no running conversation" })),
        )
    }
}

/// `DELETE /v1/conversations/:id` — explicit destruction ahead of TTL.
/// Running conversations must be cancelled first.
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    if state.cancel_map.is_running(id) {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": "conversation is running; cancel it first" })),
        );
    }
    match state.store.delete_conversation(id).await {
        Ok(true) => (StatusCode::OK, Json(serde_json::json!({ "deleted": true }))),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "deleted": false })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}
