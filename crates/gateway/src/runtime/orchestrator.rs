//! The public entry point: run a whole conversation under a coordination
//! pattern, with admission control, the HITL gate, cooperative
//! cancellation, and per-conversation serialization.
//!
//! Expected policy outcomes are data, not exceptions: every caller-visible
//! result is an [`OrchestrateOutcome`] variant.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use orch_agents::AgentDescriptor;
use orch_domain::convo::{
    ApprovalStatus, Conversation, ConversationStatus, CoordinationPattern, MissionPhase,
};
use orch_domain::event::{EventName, EventSink, OrchEvent};
use orch_domain::{Error, Money, Result};
use orch_ledger::BudgetStatus;

use crate::state::AppState;

use super::cancel::CancelToken;
use super::selector::{SelectionRationale, SpeakerSelector};
use super::tools::DecisionPlan;
use super::turn::{run_turn, TurnOutcome, TurnParams};
use super::workflow::run_workflow;

/// Output line that ends a round-robin group conversation.
const GROUP_TERMINATOR: &str = "TERMINATE";

/// Output marker that counts as a new decision for swarm convergence.
const DECISION_MARKER: &str = "DECISION:";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / reply shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestContext {
    #[serde(default, rename = "coordinationPattern")]
    pub coordination_pattern: Option<CoordinationPattern>,
    #[serde(default, rename = "missionPhase")]
    pub mission_phase: Option<MissionPhase>,
    #[serde(default, rename = "requiresApproval")]
    pub requires_approval: bool,
    #[serde(default, rename = "workflowID")]
    pub workflow_id: Option<String>,
    #[serde(default, rename = "approvalID")]
    pub approval_id: Option<Uuid>,
    #[serde(default)]
    pub participants: Option<Vec<String>>,
    #[serde(default, rename = "decisionPlan")]
    pub decision_plan: Option<DecisionPlan>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct OrchestrateRequest {
    pub message: String,
    pub user_id: String,
    pub conversation_id: Option<Uuid>,
    pub context: RequestContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostSummary {
    #[serde(rename = "totalCostUSD")]
    pub total_cost_usd: Money,
    #[serde(rename = "inputTokens")]
    pub input_tokens: u64,
    #[serde(rename = "outputTokens")]
    pub output_tokens: u64,
    #[serde(rename = "totalTokens")]
    pub total_tokens: u64,
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestrateReply {
    #[serde(rename = "conversationID")]
    pub conversation_id: Uuid,
    pub response: String,
    #[serde(rename = "agentsUsed")]
    pub agents_used: Vec<String>,
    #[serde(rename = "turnCount")]
    pub turn_count: u32,
    #[serde(rename = "durationSeconds")]
    pub duration_seconds: f64,
    #[serde(rename = "costBreakdown")]
    pub cost_breakdown: CostSummary,
    pub timestamp: DateTime<Utc>,
}

/// Every caller-visible result of an orchestrate call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrchestrateOutcome {
    Ok(OrchestrateReply),
    ApprovalRequired {
        #[serde(rename = "approvalID")]
        approval_id: Uuid,
        #[serde(rename = "conversationID")]
        conversation_id: Uuid,
    },
    ApprovalDenied {
        #[serde(rename = "conversationID")]
        conversation_id: Uuid,
    },
    Busy,
    CircuitOpen {
        reason: String,
    },
    BudgetExceeded {
        detail: String,
    },
    Invalid {
        message: String,
    },
    Cancelled(OrchestrateReply),
    Internal {
        message: String,
    },
}

impl OrchestrateOutcome {
    /// Error-taxonomy identifier for API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestrateOutcome::Ok(_) => "ok",
            OrchestrateOutcome::ApprovalRequired { .. } => "approval_required",
            OrchestrateOutcome::ApprovalDenied { .. } => "approval_denied",
            OrchestrateOutcome::Busy => "busy",
            OrchestrateOutcome::CircuitOpen { .. } => "circuit_open",
            OrchestrateOutcome::BudgetExceeded { .. } => "budget_exceeded",
            OrchestrateOutcome::Invalid { .. } => "invalid_input",
            OrchestrateOutcome::Cancelled(_) => "cancelled",
            OrchestrateOutcome::Internal { .. } => "internal",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-run accumulator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mutable state one orchestration threads through its turns.
pub struct ConversationRun {
    pub conversation_id: Uuid,
    pub user_id: String,
    /// Last persisted turn sequence.
    pub seq: u32,
    pub history: Vec<String>,
    pub agents_used: Vec<String>,
    pub last_output: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub last_model: String,
    pub budget_tripped: bool,
    pub plan: Option<DecisionPlan>,
}

impl ConversationRun {
    fn new(conv: &Conversation, user_id: &str, plan: Option<DecisionPlan>) -> Self {
        Self {
            conversation_id: conv.id,
            user_id: user_id.to_string(),
            seq: conv.turn_count,
            history: Vec::new(),
            agents_used: Vec::new(),
            last_output: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            last_model: String::new(),
            budget_tripped: false,
            plan,
        }
    }

    pub fn absorb(&mut self, agent_id: &str, outcome: &TurnOutcome) {
        if self.agents_used.last().map(String::as_str) != Some(agent_id) {
            self.agents_used.push(agent_id.to_string());
        }
        self.history
            .push(format!("{agent_id}: {}", outcome.turn.output_text));
        self.last_output = outcome.turn.output_text.clone();
        self.input_tokens += outcome.turn.input_tokens as u64;
        self.output_tokens += outcome.turn.output_tokens as u64;
        self.last_model = outcome.turn.model_id.clone();
        if outcome.budget_status() == BudgetStatus::Exceeded {
            self.budget_tripped = true;
        }
    }
}

/// How the pattern loop ended.
enum LoopEnd {
    Completed,
    Cancelled,
    BudgetTripped,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator;

impl Orchestrator {
    pub async fn orchestrate(state: &AppState, request: OrchestrateRequest) -> OrchestrateOutcome {
        match Self::orchestrate_inner(state, request).await {
            Ok(outcome) => outcome,
            Err(e) => match &e {
                Error::CircuitOpen(reason) => OrchestrateOutcome::CircuitOpen { reason: reason.clone() },
                Error::BudgetExceeded(detail) => {
                    OrchestrateOutcome::BudgetExceeded { detail: detail.clone() }
                }
                Error::InvalidInput(message) => OrchestrateOutcome::Invalid { message: message.clone() },
                _ => {
                    tracing::error!(error = %e, "orchestrate failed");
                    OrchestrateOutcome::Internal { message: e.kind().to_string() }
                }
            },
        }
    }

    async fn orchestrate_inner(
        state: &AppState,
        request: OrchestrateRequest,
    ) -> Result<OrchestrateOutcome> {
        let started = Instant::now();

        // ── Validation ───────────────────────────────────────────────
        if request.message.trim().is_empty() {
            return Ok(OrchestrateOutcome::Invalid { message: "message is empty".into() });
        }
        if request.user_id.trim().is_empty() {
            return Ok(OrchestrateOutcome::Invalid { message: "userID is empty".into() });
        }

        // ── Approval resume ──────────────────────────────────────────
        let mut resumed_from_approval = false;
        let mut approval_conversation: Option<Uuid> = None;
        if let Some(approval_id) = request.context.approval_id {
            let approval = match state.approvals.get(approval_id).await? {
                Some(a) => a,
                None => {
                    return Ok(OrchestrateOutcome::Invalid {
                        message: format!("approval {approval_id} not found"),
                    })
                }
            };
            match approval.status {
                ApprovalStatus::Pending => {
                    return Ok(OrchestrateOutcome::ApprovalRequired {
                        approval_id,
                        conversation_id: approval.conversation_id,
                    });
                }
                ApprovalStatus::Denied => {
                    state.obs.emit(
                        OrchEvent::new(EventName::HitlApprovalDenied)
                            .conversation(approval.conversation_id)
                            .user(&request.user_id)
                            .payload(serde_json::json!({ "approvalID": approval_id })),
                    );
                    let _ = state
                        .store
                        .update_conversation(approval.conversation_id, |c| {
                            c.status = ConversationStatus::Failed;
                        })
                        .await;
                    state.hub.finish_conversation(approval.conversation_id, "failed");
                    return Ok(OrchestrateOutcome::ApprovalDenied {
                        conversation_id: approval.conversation_id,
                    });
                }
                ApprovalStatus::Approved => {
                    state.obs.emit(
                        OrchEvent::new(EventName::HitlApprovalGranted)
                            .conversation(approval.conversation_id)
                            .user(&request.user_id)
                            .payload(serde_json::json!({ "approvalID": approval_id })),
                    );
                    resumed_from_approval = true;
                    approval_conversation = Some(approval.conversation_id);
                }
            }
        }

        // ── Conversation resolution ──────────────────────────────────
        let pattern = request
            .context
            .coordination_pattern
            .unwrap_or_default();
        let pattern = if pattern == CoordinationPattern::Swarm
            && !state
                .flags
                .is_enabled(orch_flags::names::SWARM_PATTERN, Some(&request.user_id), None)
        {
            // Swarm is staged behind its flag; groups are the fallback.
            CoordinationPattern::RoundRobinGroup
        } else {
            pattern
        };

        let mut conv = match request.conversation_id.or(approval_conversation) {
            Some(id) => {
                let Some(existing) = state.store.get_conversation(id).await? else {
                    return Ok(OrchestrateOutcome::Invalid {
                        message: format!("conversation {id} not found"),
                    });
                };
                // A terminal conversation only resumes under an active
                // emergency override recorded after the breach.
                if existing.status.is_terminal() && !state.breaker.override_active() {
                    return Ok(OrchestrateOutcome::Invalid {
                        message: format!("conversation {id} is {:?}", existing.status),
                    });
                }
                existing
            }
            None => {
                let mut fresh = Conversation::new(&request.user_id, pattern);
                fresh.participant_agent_ids =
                    resolve_participants(state, request.context.participants.as_deref())?;
                state.store.create_conversation(&fresh).await?;
                fresh
            }
        };

        let participants = load_participants(state, &conv)?;
        let phase = request.context.mission_phase.unwrap_or_default();

        // ── Per-conversation serialization ───────────────────────────
        let Ok(_permit) = state.convo_locks.try_acquire(conv.id) else {
            return Ok(OrchestrateOutcome::Busy);
        };

        // ── Entry admission ──────────────────────────────────────────
        let first_agent = SpeakerSelector::select(&request.message, &participants, phase, None)
            .map(|(agent, rationale)| (agent, Some(rationale)))
            .ok_or_else(|| Error::InvalidInput("no participants available".into()))?;
        let entry_provider = provider_of(state, &first_agent.0);
        let admission = state.breaker.should_admit(&entry_provider, &first_agent.0.id);
        if !admission.admit {
            return Ok(OrchestrateOutcome::CircuitOpen {
                reason: admission.reason.unwrap_or_else(|| "circuit open".into()),
            });
        }

        // ── HITL gate ────────────────────────────────────────────────
        let approval_sensitive = request.context.requires_approval
            || state.approval_patterns.is_match(&request.message);
        if approval_sensitive
            && !resumed_from_approval
            && state
                .flags
                .is_enabled(orch_flags::names::HITL_APPROVAL, Some(&request.user_id), None)
        {
            let approval = state
                .approvals
                .create(conv.id, &request.user_id, &request.message)
                .await?;
            state
                .store
                .update_conversation(conv.id, |c| c.status = ConversationStatus::AwaitingApproval)
                .await?;
            state.obs.emit(
                OrchEvent::new(EventName::HitlApprovalRequired)
                    .conversation(conv.id)
                    .user(&request.user_id)
                    .payload(serde_json::json!({ "approvalID": approval.id, "action": approval.action })),
            );
            return Ok(OrchestrateOutcome::ApprovalRequired {
                approval_id: approval.id,
                conversation_id: conv.id,
            });
        }
        if conv.status != ConversationStatus::Active {
            conv = state
                .store
                .update_conversation(conv.id, |c| c.status = ConversationStatus::Active)
                .await?;
        }

        // ── Run the pattern loop ─────────────────────────────────────
        let cancel = state.cancel_map.register(conv.id);
        let watchdog = spawn_deadline_watchdog(state, cancel.clone());

        state.obs.emit(
            OrchEvent::new(EventName::ConversationStart)
                .conversation(conv.id)
                .user(&request.user_id)
                .payload(serde_json::json!({
                    "pattern": conv.coordination_pattern,
                    "participants": conv.participant_agent_ids,
                })),
        );

        let span = tracing::info_span!("conversation", id = %conv.id, pattern = ?conv.coordination_pattern);
        let mut run = ConversationRun::new(&conv, &request.user_id, request.context.decision_plan.clone());
        let loop_result = Self::run_pattern(
            state,
            &cancel,
            &mut run,
            conv.coordination_pattern,
            &request,
            &participants,
            phase,
            first_agent,
        )
        .instrument(span)
        .await;

        watchdog.abort();
        state.cancel_map.remove(conv.id);

        // ── Finalize ─────────────────────────────────────────────────
        let outcome = match loop_result {
            Ok(LoopEnd::Completed) => {
                let reply = Self::finish(state, &run, started, ConversationStatus::Completed, "completed")
                    .await?;
                OrchestrateOutcome::Ok(reply)
            }
            Ok(LoopEnd::Cancelled) => {
                state.obs.emit(
                    OrchEvent::new(EventName::ErrorOccurred)
                        .conversation(run.conversation_id)
                        .user(&run.user_id)
                        .payload(serde_json::json!({ "kind": "cancelled" })),
                );
                let reply =
                    Self::finish(state, &run, started, ConversationStatus::Completed, "cancelled").await?;
                OrchestrateOutcome::Cancelled(reply)
            }
            Ok(LoopEnd::BudgetTripped) => {
                let _ = Self::finish(state, &run, started, ConversationStatus::Failed, "budget_exceeded")
                    .await;
                OrchestrateOutcome::BudgetExceeded {
                    detail: "budget exceeded during conversation".into(),
                }
            }
            Err(e) => {
                state.obs.emit(
                    OrchEvent::new(EventName::ErrorOccurred)
                        .conversation(run.conversation_id)
                        .user(&run.user_id)
                        .payload(serde_json::json!({ "kind": e.kind(), "message": e.to_string() })),
                );
                let terminal = match &e {
                    Error::CircuitOpen(_) => "circuit_open",
                    _ => "error",
                };
                let _ = Self::finish(state, &run, started, ConversationStatus::Failed, terminal).await;
                return Err(e);
            }
        };
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pattern(
        state: &AppState,
        cancel: &CancelToken,
        run: &mut ConversationRun,
        pattern: CoordinationPattern,
        request: &OrchestrateRequest,
        participants: &[Arc<AgentDescriptor>],
        phase: MissionPhase,
        first_agent: (Arc<AgentDescriptor>, Option<SelectionRationale>),
    ) -> Result<LoopEnd> {
        match pattern {
            CoordinationPattern::SingleAgent => {
                Self::single_turn(state, cancel, run, &request.message, first_agent).await
            }
            CoordinationPattern::RoundRobinGroup => {
                // A group of one behaves exactly like single_agent.
                if participants.len() == 1 {
                    return Self::single_turn(state, cancel, run, &request.message, first_agent).await;
                }
                Self::round_robin(state, cancel, run, &request.message, participants, first_agent).await
            }
            CoordinationPattern::WorkflowGraph => {
                let Some(workflow_id) = request.context.workflow_id.as_deref() else {
                    return Err(Error::InvalidInput("workflow_graph requires workflowID".into()));
                };
                let Some(spec) = state.config.workflows.get(workflow_id).cloned() else {
                    return Err(Error::InvalidInput(format!("unknown workflow {workflow_id}")));
                };
                let result =
                    run_workflow(state, cancel, run, workflow_id, &spec, &request.message).await?;
                run.last_output = result.final_output.clone();
                if result.cancelled {
                    Ok(LoopEnd::Cancelled)
                } else if run.budget_tripped {
                    Ok(LoopEnd::BudgetTripped)
                } else {
                    Ok(LoopEnd::Completed)
                }
            }
            CoordinationPattern::Swarm => {
                Self::swarm(state, cancel, run, &request.message, participants, phase, first_agent).await
            }
        }
    }

    async fn single_turn(
        state: &AppState,
        cancel: &CancelToken,
        run: &mut ConversationRun,
        message: &str,
        (agent, rationale): (Arc<AgentDescriptor>, Option<SelectionRationale>),
    ) -> Result<LoopEnd> {
        run.seq += 1;
        let outcome = run_turn(
            state,
            cancel,
            TurnParams {
                conversation_id: run.conversation_id,
                user_id: run.user_id.clone(),
                seq: run.seq,
                agent: agent.clone(),
                message: message.to_string(),
                history: run.history.clone(),
                rationale,
                plan: run.plan.clone(),
            },
        )
        .await?;
        run.absorb(&agent.id, &outcome);
        if outcome.cancelled {
            Ok(LoopEnd::Cancelled)
        } else if run.budget_tripped {
            Ok(LoopEnd::BudgetTripped)
        } else {
            Ok(LoopEnd::Completed)
        }
    }

    async fn round_robin(
        state: &AppState,
        cancel: &CancelToken,
        run: &mut ConversationRun,
        user_message: &str,
        participants: &[Arc<AgentDescriptor>],
        first_agent: (Arc<AgentDescriptor>, Option<SelectionRationale>),
    ) -> Result<LoopEnd> {
        run.history.push(format!("user: {user_message}"));
        let mut position = participants
            .iter()
            .position(|a| a.id == first_agent.0.id)
            .unwrap_or(0);
        let mut message = user_message.to_string();
        let mut rationale = first_agent.1;

        for _ in 0..state.config.orchestration.max_turns {
            if cancel.is_cancelled() {
                return Ok(LoopEnd::Cancelled);
            }
            let agent = participants[position].clone();
            run.seq += 1;
            let outcome = run_turn(
                state,
                cancel,
                TurnParams {
                    conversation_id: run.conversation_id,
                    user_id: run.user_id.clone(),
                    seq: run.seq,
                    agent: agent.clone(),
                    message: message.clone(),
                    history: run.history.clone(),
                    rationale: rationale.take(),
                    plan: run.plan.clone(),
                },
            )
            .await?;
            run.absorb(&agent.id, &outcome);

            if outcome.cancelled {
                return Ok(LoopEnd::Cancelled);
            }
            if run.budget_tripped {
                return Ok(LoopEnd::BudgetTripped);
            }
            if outcome.turn.output_text.contains(GROUP_TERMINATOR) {
                return Ok(LoopEnd::Completed);
            }

            message = outcome.turn.output_text;
            position = (position + 1) % participants.len();
        }
        Ok(LoopEnd::Completed)
    }

    async fn swarm(
        state: &AppState,
        cancel: &CancelToken,
        run: &mut ConversationRun,
        user_message: &str,
        participants: &[Arc<AgentDescriptor>],
        phase: MissionPhase,
        first_agent: (Arc<AgentDescriptor>, Option<SelectionRationale>),
    ) -> Result<LoopEnd> {
        run.history.push(format!("user: {user_message}"));
        let mut message = user_message.to_string();
        let mut previous: Option<String> = None;
        let mut selection = Some(first_agent);
        let mut stale_turns = 0u32;

        for _ in 0..state.config.orchestration.max_turns {
            if cancel.is_cancelled() {
                return Ok(LoopEnd::Cancelled);
            }
            let (agent, rationale) = match selection.take() {
                Some(s) => s,
                None => {
                    let (agent, rationale) =
                        SpeakerSelector::select(&message, participants, phase, previous.as_deref())
                            .ok_or_else(|| Error::InvalidInput("no participants available".into()))?;
                    (agent, Some(rationale))
                }
            };

            run.seq += 1;
            let outcome = run_turn(
                state,
                cancel,
                TurnParams {
                    conversation_id: run.conversation_id,
                    user_id: run.user_id.clone(),
                    seq: run.seq,
                    agent: agent.clone(),
                    message: message.clone(),
                    history: run.history.clone(),
                    rationale,
                    plan: run.plan.clone(),
                },
            )
            .await?;
            run.absorb(&agent.id, &outcome);

            if outcome.cancelled {
                return Ok(LoopEnd::Cancelled);
            }
            if run.budget_tripped {
                return Ok(LoopEnd::BudgetTripped);
            }

            // Convergence: consecutive turns with neither tools nor new
            // decisions end the swarm.
            let novel = !outcome.turn.tool_calls.is_empty()
                || outcome.turn.output_text.contains(DECISION_MARKER);
            if novel {
                stale_turns = 0;
            } else {
                stale_turns += 1;
                if stale_turns >= state.config.orchestration.swarm_convergence_window {
                    return Ok(LoopEnd::Completed);
                }
            }

            previous = Some(agent.id.clone());
            message = outcome.turn.output_text;
        }
        Ok(LoopEnd::Completed)
    }

    /// Seal the conversation, emit `conversation.end`, publish `final`,
    /// and assemble the reply from persisted aggregates.
    async fn finish(
        state: &AppState,
        run: &ConversationRun,
        started: Instant,
        status: ConversationStatus,
        final_status: &str,
    ) -> Result<OrchestrateReply> {
        let conv = state
            .store
            .update_conversation(run.conversation_id, |c| c.status = status)
            .await?;

        let duration = started.elapsed().as_secs_f64();
        state
            .obs
            .metrics()
            .record_histogram(crate::observability::metrics::H_CONVERSATION_DURATION, duration);
        state.obs.emit(
            OrchEvent::new(EventName::ConversationEnd)
                .conversation(run.conversation_id)
                .user(&run.user_id)
                .payload(serde_json::json!({
                    "status": final_status,
                    "turns": conv.turn_count,
                    "totalCostUSD": conv.cumulative_cost_usd,
                })),
        );
        state.hub.finish_conversation(run.conversation_id, final_status);

        Ok(OrchestrateReply {
            conversation_id: run.conversation_id,
            response: run.last_output.clone(),
            agents_used: run.agents_used.clone(),
            turn_count: conv.turn_count,
            duration_seconds: duration,
            cost_breakdown: CostSummary {
                total_cost_usd: conv.cumulative_cost_usd,
                input_tokens: run.input_tokens,
                output_tokens: run.output_tokens,
                total_tokens: run.input_tokens + run.output_tokens,
                model: run.last_model.clone(),
            },
            timestamp: Utc::now(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate explicit participants, or pick the default set: the pinned
/// coordination agents that exist, topped up with the first few others.
fn resolve_participants(state: &AppState, explicit: Option<&[String]>) -> Result<Vec<String>> {
    match explicit {
        Some(ids) => {
            if ids.is_empty() {
                return Err(Error::InvalidInput("participants list is empty".into()));
            }
            for id in ids {
                if !state.agents.contains(id) {
                    return Err(Error::InvalidInput(format!("unknown agent {id}")));
                }
            }
            Ok(ids.to_vec())
        }
        None => {
            const PINNED: &[&str] = &[
                "ali_chief_of_staff",
                "wanda_workflow_orchestrator",
                "xavier_coordination_patterns",
            ];
            let mut ids: Vec<String> = PINNED
                .iter()
                .filter(|id| state.agents.contains(id))
                .map(|id| id.to_string())
                .collect();
            for agent in state.agents.list(&orch_agents::AgentFilter::default()) {
                if ids.len() >= PINNED.len() + 5 {
                    break;
                }
                if !ids.contains(&agent.id) {
                    ids.push(agent.id.clone());
                }
            }
            if ids.is_empty() {
                return Err(Error::InvalidInput("agent registry is empty".into()));
            }
            Ok(ids)
        }
    }
}

fn load_participants(state: &AppState, conv: &Conversation) -> Result<Vec<Arc<AgentDescriptor>>> {
    conv.participant_agent_ids
        .iter()
        .map(|id| {
            state
                .agents
                .get(id)
                .ok_or_else(|| Error::InvalidInput(format!("unknown agent {id}")))
        })
        .collect()
}

fn provider_of(state: &AppState, agent: &AgentDescriptor) -> String {
    let spec = if agent.default_model.is_empty() {
        state.config.orchestration.default_model.clone()
    } else {
        agent.default_model.clone()
    };
    state
        .models
        .resolve(&spec)
        .map(|(client, _)| client.provider_id().to_string())
        .unwrap_or_default()
}

/// Cancels the run's token when the request deadline elapses.
fn spawn_deadline_watchdog(state: &AppState, cancel: CancelToken) -> tokio::task::JoinHandle<()> {
    let timeout = std::time::Duration::from_secs(state.config.orchestration.timeout_seconds);
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        cancel.cancel();
    })
}
