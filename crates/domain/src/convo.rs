//! Conversation, turn, and approval entities.
//!
//! The orchestrator owns conversations and turns; these structs are the
//! persisted shapes. Turns are sealed (immutable) once finalized.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::Money;
use crate::tool::{ToolCall, ToolOutcome};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coordination pattern
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How turns are sequenced across participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationPattern {
    #[default]
    SingleAgent,
    RoundRobinGroup,
    WorkflowGraph,
    Swarm,
}

/// High-level mission label used to weight capability tags in selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissionPhase {
    #[default]
    Discovery,
    Analysis,
    Strategy,
    Execution,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Paused,
    AwaitingApproval,
    Completed,
    Failed,
}

impl ConversationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: ConversationStatus,
    pub coordination_pattern: CoordinationPattern,
    pub participant_agent_ids: Vec<String>,
    pub turn_count: u32,
    pub cumulative_cost_usd: Money,
    pub cumulative_tokens: u64,
    /// Free-form request context carried across turns (mission phase,
    /// workflow id, caller-supplied extras).
    #[serde(default)]
    pub context_bag: HashMap<String, serde_json::Value>,
}

impl Conversation {
    pub fn new(user_id: impl Into<String>, pattern: CoordinationPattern) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            created_at: now,
            updated_at: now,
            status: ConversationStatus::Active,
            coordination_pattern: pattern,
            participant_agent_ids: Vec::new(),
            turn_count: 0,
            cumulative_cost_usd: Money::ZERO,
            cumulative_tokens: 0,
            context_bag: HashMap::new(),
        }
    }

    /// Fold a sealed turn into the conversation aggregates.
    pub fn absorb_turn(&mut self, turn: &Turn) {
        self.turn_count += 1;
        self.cumulative_cost_usd += turn.cost_usd;
        self.cumulative_tokens += (turn.input_tokens + turn.output_tokens) as u64;
        self.updated_at = Utc::now();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Running,
    Ok,
    Failed,
    Cancelled,
}

impl TurnStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

/// One request-response cycle between the orchestrator and a single agent.
///
/// Created at turn start, sealed exactly once via [`Turn::seal`]; fields are
/// never mutated after sealing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// 1-based, dense within a conversation.
    pub seq: u32,
    pub agent_id: String,
    pub role_in_turn: TurnRole,
    pub input_prompt: String,
    pub output_text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_results: Vec<ToolOutcome>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: Money,
    pub model_id: String,
    pub latency_ms: u64,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: TurnStatus,
}

impl Turn {
    pub fn begin(
        conversation_id: Uuid,
        seq: u32,
        agent_id: impl Into<String>,
        model_id: impl Into<String>,
        input_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            seq,
            agent_id: agent_id.into(),
            role_in_turn: TurnRole::Assistant,
            input_prompt: input_prompt.into(),
            output_text: String::new(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: Money::ZERO,
            model_id: model_id.into(),
            latency_ms: 0,
            started_at: Utc::now(),
            ended_at: None,
            status: TurnStatus::Running,
        }
    }

    /// Finalize the turn. `ended_at >= started_at` always holds.
    pub fn seal(&mut self, status: TurnStatus) {
        let now = Utc::now();
        let ended = if now < self.started_at { self.started_at } else { now };
        self.ended_at = Some(ended);
        self.latency_ms = (ended - self.started_at).num_milliseconds().max(0) as u64;
        self.status = status;
    }

    /// An `ok` turn must carry output text or tool calls.
    pub fn satisfies_output_invariant(&self) -> bool {
        self.status != TurnStatus::Ok
            || !self.output_text.is_empty()
            || !self.tool_calls.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approval request (HITL)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Transitions are monotonic: pending -> {approved, denied}.
    pub fn can_transition_to(self, next: ApprovalStatus) -> bool {
        self == ApprovalStatus::Pending && next != ApprovalStatus::Pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub user_id: String,
    /// The gated action, e.g. the message that triggered the hold.
    pub action: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn pending(conversation_id: Uuid, user_id: impl Into<String>, action: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            user_id: user_id.into(),
            action: action.into(),
            metadata: HashMap::new(),
            status: ApprovalStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
