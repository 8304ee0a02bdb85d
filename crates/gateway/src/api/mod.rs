//! HTTP surface: orchestrate, streaming (SSE + WS), approvals, admin.

pub mod admin;
pub mod approvals;
pub mod orchestrate;
pub mod stream;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/orchestrate", post(orchestrate::orchestrate))
        .route("/v1/conversations/:id", delete(orchestrate::delete_conversation))
        .route("/v1/conversations/:id/cancel", post(orchestrate::cancel))
        .route("/v1/conversations/:id/events", get(stream::sse_events))
        .route("/v1/conversations/:id/ws", get(stream::ws_events))
        .route("/v1/approvals", get(approvals::list_pending))
        .route("/v1/approvals/:id", get(approvals::get_one))
        .route("/v1/approvals/:id/approve", post(approvals::approve))
        .route("/v1/approvals/:id/deny", post(approvals::deny))
        .nest("/admin", admin::router())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
