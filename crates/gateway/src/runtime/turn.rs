//! Turn execution — one request-response cycle with a single agent.
//!
//! Phase split: resolve (agent, model, context) → stream the model →
//! dispatch tools with bounded continuations → charge the ledger →
//! persist. Event order within a turn is fixed:
//! `tool.invoked* < cost.tracked < budget.* < agent.response`.
//! Cancellation is checked at every streamed chunk and before every tool
//! batch; a cancelled turn is still persisted and its consumed tokens are
//! still billed.

use std::sync::Arc;

use futures_util::StreamExt;
use uuid::Uuid;

use orch_agents::AgentDescriptor;
use orch_domain::convo::{Turn, TurnStatus};
use orch_domain::event::{EventName, EventSink, OrchEvent};
use orch_domain::stream::{ModelEvent, Usage};
use orch_domain::tool::{Message, ToolCall};
use orch_domain::{Error, Result};
use orch_ledger::{BudgetStatus, TurnCharge, TurnUsage};
use orch_providers::{with_retries, CompletionRequest};

use crate::observability::metrics::{
    H_AGENT_RESPONSE_TIME, H_COST_PER_TURN, H_TOKENS_PER_TURN,
};
use crate::state::AppState;

use super::cancel::CancelToken;
use super::selector::SelectionRationale;
use super::tools::{DecisionPlan, ToolExecutor};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parameters & outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TurnParams {
    pub conversation_id: Uuid,
    pub user_id: String,
    /// 1-based, dense within the conversation.
    pub seq: u32,
    pub agent: Arc<AgentDescriptor>,
    pub message: String,
    /// Prior exchanges as `speaker: text` lines, oldest first.
    pub history: Vec<String>,
    pub rationale: Option<SelectionRationale>,
    pub plan: Option<DecisionPlan>,
}

pub struct TurnOutcome {
    pub turn: Turn,
    pub charge: Option<TurnCharge>,
    pub cancelled: bool,
}

impl TurnOutcome {
    pub fn budget_status(&self) -> BudgetStatus {
        self.charge
            .as_ref()
            .map(TurnCharge::effective_status)
            .unwrap_or(BudgetStatus::Healthy)
    }
}

/// Rough token estimate for streams that were cut before `Done` arrived.
fn estimate_tokens(text: &str) -> u32 {
    (text.len() as u32 + 3) / 4
}

/// Map `speaker: text` history lines onto chat messages.
fn history_to_messages(history: &[String]) -> Vec<Message> {
    history
        .iter()
        .map(|line| match line.split_once(": ") {
            Some(("user", text)) => Message::user(text),
            Some((_, _)) | None => Message::assistant(line.as_str()),
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execute one turn to completion (ok, failed, or cancelled). Every exit
/// path seals and persists the turn and updates the conversation
/// aggregates; the caller decides what the outcome means for the loop.
pub async fn run_turn(
    state: &AppState,
    cancel: &CancelToken,
    params: TurnParams,
) -> Result<TurnOutcome> {
    let span = tracing::info_span!(
        "turn",
        conversation = %params.conversation_id,
        seq = params.seq,
        agent = %params.agent.id,
    );
    let _guard = span.enter();

    // ── Resolve model ────────────────────────────────────────────────
    let spec = if params.agent.default_model.is_empty() {
        state.config.orchestration.default_model.clone()
    } else {
        params.agent.default_model.clone()
    };
    let (client, model) = state.models.resolve(&spec)?;
    let provider = client.provider_id().to_string();

    // ── Per-turn RAG (flag-gated) ────────────────────────────────────
    let mut message = params.message.clone();
    if state
        .flags
        .is_enabled(orch_flags::names::PER_TURN_RAG, Some(&params.user_id), None)
    {
        match state
            .rag
            .inject_context(
                params.conversation_id,
                &params.user_id,
                &params.agent,
                params.seq,
                &params.message,
                &params.history,
            )
            .await
        {
            Ok(enhanced) => {
                state.obs.emit(
                    OrchEvent::new(EventName::MemoryAccess)
                        .conversation(params.conversation_id)
                        .user(&params.user_id)
                        .agent(&params.agent.id)
                        .payload(serde_json::json!({
                            "factsInjected": enhanced.facts_injected,
                            "historyInjected": enhanced.history_injected,
                            "fromCache": enhanced.from_cache,
                        })),
                );
                message = enhanced.text;
            }
            Err(e) => {
                tracing::warn!(error = %e, "context injection failed; continuing without RAG");
            }
        }
    }

    // ── Admission ────────────────────────────────────────────────────
    let admission = state.breaker.should_admit(&provider, &params.agent.id);
    let mut turn = Turn::begin(
        params.conversation_id,
        params.seq,
        &params.agent.id,
        &model,
        &message,
    );
    if !admission.admit {
        let reason = admission.reason.unwrap_or_else(|| "circuit open".into());
        state.obs.emit(
            OrchEvent::new(EventName::BudgetEvent)
                .conversation(params.conversation_id)
                .user(&params.user_id)
                .agent(&params.agent.id)
                .payload(serde_json::json!({ "blocked": true, "reason": reason })),
        );
        turn.seal(TurnStatus::Failed);
        persist(state, &turn).await?;
        return Err(Error::CircuitOpen(reason));
    }

    // ── Selection & invocation events ────────────────────────────────
    if let Some(rationale) = &params.rationale {
        if state
            .flags
            .is_enabled(orch_flags::names::SELECTION_EVENTS, Some(&params.user_id), None)
        {
            state.obs.emit(
                OrchEvent::new(EventName::SelectionDecision)
                    .conversation(params.conversation_id)
                    .user(&params.user_id)
                    .agent(&params.agent.id)
                    .payload(serde_json::to_value(rationale)?),
            );
        }
    }
    state.obs.emit(
        OrchEvent::new(EventName::DecisionMade)
            .conversation(params.conversation_id)
            .user(&params.user_id)
            .agent(&params.agent.id)
            .payload(serde_json::json!({
                "model": model,
                "provider": provider,
                "rationale": params.rationale.as_ref().map(|r| serde_json::to_value(r).ok()),
            })),
    );
    state.obs.emit(
        OrchEvent::new(EventName::AgentInvocation)
            .conversation(params.conversation_id)
            .user(&params.user_id)
            .agent(&params.agent.id)
            .payload(serde_json::json!({ "model": model })),
    );

    // ── Build the prompt ─────────────────────────────────────────────
    let tool_defs = state.tools.definitions_for(&params.agent.tool_ids);
    let mut messages = Vec::with_capacity(params.history.len() + 2);
    messages.push(Message::system(&params.agent.system_prompt));
    messages.extend(history_to_messages(&params.history));
    messages.push(Message::user(&message));

    // ── Stream + tool loop ───────────────────────────────────────────
    state.obs.emit(
        OrchEvent::new(EventName::StreamingStart)
            .conversation(params.conversation_id)
            .agent(&params.agent.id),
    );

    let mut text_buf = String::new();
    let mut total_usage = Usage::default();
    let mut continuation = 0u32;
    let mut was_cancelled = false;
    let mut stream_failed: Option<Error> = None;

    loop {
        let req = CompletionRequest {
            messages: messages.clone(),
            tools: tool_defs.clone(),
            temperature: Some(0.2),
            max_tokens: None,
            model: Some(model.clone()),
        };

        // Transient connect errors retry with backoff; mid-stream errors
        // surface (streamed partials are never retracted).
        let llm_span = tracing::info_span!("model.call", model = %model, provider = %provider);
        let _llm_guard = llm_span.enter();
        let mut stream = match with_retries(&state.config.retry, || {
            client.complete_stream(req.clone())
        })
        .await
        {
            Ok(s) => s,
            Err(e) => {
                stream_failed = Some(e);
                break;
            }
        };

        let mut pending_tools: Vec<ToolCall> = Vec::new();
        let mut round_usage: Option<Usage> = None;

        while let Some(event) = stream.next().await {
            if cancel.is_cancelled() {
                was_cancelled = true;
                break;
            }
            match event {
                Ok(ModelEvent::Token { text }) => {
                    state.obs.emit(
                        OrchEvent::new(EventName::StreamingChunk)
                            .conversation(params.conversation_id)
                            .agent(&params.agent.id)
                            .payload(serde_json::json!({ "text": text })),
                    );
                    text_buf.push_str(&text);
                }
                Ok(ModelEvent::ToolCall(tc)) => pending_tools.push(tc),
                Ok(ModelEvent::Done { usage, .. }) => round_usage = usage,
                Err(e) => {
                    stream_failed = Some(e);
                    break;
                }
            }
        }
        drop(_llm_guard);

        if let Some(u) = &round_usage {
            total_usage.accumulate(u);
        }
        if was_cancelled || stream_failed.is_some() {
            break;
        }

        if pending_tools.is_empty() {
            break;
        }

        // ── Tool dispatch ────────────────────────────────────────────
        if cancel.is_cancelled() {
            was_cancelled = true;
            break;
        }
        turn.tool_calls.extend(pending_tools.iter().cloned());
        let executor = ToolExecutor::new(
            &state.tools,
            state.obs.as_ref(),
            state.config.orchestration.tool_arg_preview_len,
        );
        let outcomes = executor
            .execute(
                params.conversation_id,
                &params.agent.id,
                &pending_tools,
                params.plan.as_ref(),
            )
            .await;

        for outcome in &outcomes {
            messages.push(Message::tool_result(&outcome.call_id, &outcome.content));
        }
        turn.tool_results.extend(outcomes);

        continuation += 1;
        if continuation > state.config.orchestration.max_tool_continuations {
            tracing::warn!(continuation, "tool continuation bound reached");
            break;
        }
    }

    state.obs.emit(
        OrchEvent::new(EventName::StreamingEnd)
            .conversation(params.conversation_id)
            .agent(&params.agent.id),
    );

    // ── Charge the ledger ────────────────────────────────────────────
    // A stream cut before Done reports no usage; bill the estimate of
    // what was actually consumed.
    if total_usage.total() == 0 && !text_buf.is_empty() {
        total_usage.output_tokens = estimate_tokens(&text_buf);
    }
    turn.input_tokens = total_usage.input_tokens;
    turn.output_tokens = total_usage.output_tokens;
    turn.output_text = text_buf;

    let charge = state
        .ledger
        .record_turn(TurnUsage {
            conversation_id: params.conversation_id,
            turn_id: turn.id,
            agent_id: params.agent.id.clone(),
            provider: provider.clone(),
            model: model.clone(),
            input_tokens: total_usage.input_tokens as u64,
            output_tokens: total_usage.output_tokens as u64,
            latency_ms: (chrono::Utc::now() - turn.started_at).num_milliseconds().max(0) as u64,
        })
        .await?;
    turn.cost_usd = charge.breakdown.total;

    state.obs.emit(
        OrchEvent::new(EventName::CostTracked)
            .conversation(params.conversation_id)
            .user(&params.user_id)
            .agent(&params.agent.id)
            .payload(serde_json::json!({
                "turnCostUSD": charge.breakdown.total,
                "conversationTotalUSD": charge.conv_total,
                "dailyTotalUSD": charge.daily_total,
                "model": model,
            })),
    );

    emit_budget_events(state, &params, &charge);
    detect_cost_spike(state, &params, &charge);

    // ── Seal & persist ───────────────────────────────────────────────
    let status = if was_cancelled {
        TurnStatus::Cancelled
    } else if stream_failed.is_some() {
        TurnStatus::Failed
    } else {
        TurnStatus::Ok
    };
    turn.seal(status);
    persist(state, &turn).await?;

    state
        .obs
        .metrics()
        .record_histogram(H_COST_PER_TURN, charge.breakdown.total.to_f64_lossy());
    state
        .obs
        .metrics()
        .record_histogram(H_TOKENS_PER_TURN, total_usage.total() as f64);
    state
        .obs
        .metrics()
        .record_histogram(H_AGENT_RESPONSE_TIME, turn.latency_ms as f64);

    state.obs.emit(
        OrchEvent::new(EventName::AgentResponse)
            .conversation(params.conversation_id)
            .user(&params.user_id)
            .agent(&params.agent.id)
            .payload(serde_json::json!({
                "status": status,
                "latencyMs": turn.latency_ms,
                "outputChars": turn.output_text.len(),
            })),
    );

    if let Some(e) = stream_failed {
        state.breaker.record_failure(&e.to_string());
        state.obs.emit(
            OrchEvent::new(EventName::ErrorOccurred)
                .conversation(params.conversation_id)
                .agent(&params.agent.id)
                .payload(serde_json::json!({ "kind": e.kind(), "message": e.to_string() })),
        );
        return Err(e);
    }
    state.breaker.record_success();

    Ok(TurnOutcome {
        turn,
        charge: Some(charge),
        cancelled: was_cancelled,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn persist(state: &AppState, turn: &Turn) -> Result<()> {
    state.store.append_turn(turn).await?;
    state
        .store
        .update_conversation(turn.conversation_id, |conv| conv.absorb_turn(turn))
        .await?;
    Ok(())
}

fn emit_budget_events(state: &AppState, params: &TurnParams, charge: &TurnCharge) {
    let remaining = state.ledger.budget().daily_limit_usd - charge.daily_total;
    state
        .obs
        .metrics()
        .set_budget_remaining(remaining.to_f64_lossy().max(0.0));

    match charge.effective_status() {
        BudgetStatus::Healthy => {}
        BudgetStatus::Warning | BudgetStatus::Critical => {
            state.obs.emit(
                OrchEvent::new(EventName::BudgetWarning)
                    .conversation(params.conversation_id)
                    .user(&params.user_id)
                    .payload(serde_json::json!({
                        "status": charge.effective_status(),
                        "dailyTotalUSD": charge.daily_total,
                        "conversationTotalUSD": charge.conv_total,
                    })),
            );
        }
        BudgetStatus::Exceeded => {
            let scope = if charge.daily_status == BudgetStatus::Exceeded {
                "daily"
            } else {
                "conversation"
            };
            state.obs.emit(
                OrchEvent::new(EventName::BudgetExceeded)
                    .conversation(params.conversation_id)
                    .user(&params.user_id)
                    .payload(serde_json::json!({
                        "scope": scope,
                        "dailyTotalUSD": charge.daily_total,
                        "conversationTotalUSD": charge.conv_total,
                    })),
            );
            state.breaker.on_budget_exceeded(scope);
        }
    }
}

/// A turn costing several times the conversation's rolling mean counts as
/// a failure toward the breaker threshold.
fn detect_cost_spike(state: &AppState, params: &TurnParams, charge: &TurnCharge) {
    if params.seq < 2 {
        return;
    }
    let turn_cost = charge.breakdown.total.to_f64_lossy();
    let prior_total = (charge.conv_total - charge.breakdown.total).to_f64_lossy();
    let prior_mean = prior_total / (params.seq - 1) as f64;
    if prior_mean > 0.0 && turn_cost > prior_mean * state.config.budget.spike_multiplier {
        state.breaker.record_failure("cost spike");
        state.obs.emit(
            OrchEvent::new(EventName::PerformanceDegradation)
                .conversation(params.conversation_id)
                .agent(&params.agent.id)
                .payload(serde_json::json!({
                    "kind": "cost_spike",
                    "turnCostUSD": turn_cost,
                    "priorMeanUSD": prior_mean,
                })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_quarters_bytes() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcdefghi"), 3);
    }

    #[test]
    fn history_lines_map_to_roles() {
        let history = vec![
            "user: hello".to_string(),
            "amy_cfo: budget looks fine".to_string(),
        ];
        let messages = history_to_messages(&history);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, orch_domain::tool::Role::User);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].role, orch_domain::tool::Role::Assistant);
        assert!(messages[1].content.contains("amy_cfo"));
    }
}
