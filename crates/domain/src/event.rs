//! Structured observability events.
//!
//! Event names are a closed enum — emitters cannot invent ad-hoc strings,
//! and every event carries the conversation/user/agent ids where they
//! apply. Components receive the sink as a capability handle; events refer
//! to entities by id, never by reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event names
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "conversation.start")]
    ConversationStart,
    #[serde(rename = "conversation.end")]
    ConversationEnd,
    #[serde(rename = "agent.invocation")]
    AgentInvocation,
    #[serde(rename = "agent.response")]
    AgentResponse,
    #[serde(rename = "tool.call")]
    ToolCall,
    #[serde(rename = "tool.result")]
    ToolResult,
    #[serde(rename = "decision.made")]
    DecisionMade,
    #[serde(rename = "tool.invoked")]
    ToolInvoked,
    #[serde(rename = "budget.event")]
    BudgetEvent,
    #[serde(rename = "workflow.start")]
    WorkflowStart,
    #[serde(rename = "workflow.step")]
    WorkflowStep,
    #[serde(rename = "workflow.end")]
    WorkflowEnd,
    #[serde(rename = "cost.tracked")]
    CostTracked,
    #[serde(rename = "budget.warning")]
    BudgetWarning,
    #[serde(rename = "budget.exceeded")]
    BudgetExceeded,
    #[serde(rename = "memory.access")]
    MemoryAccess,
    #[serde(rename = "memory.update")]
    MemoryUpdate,
    #[serde(rename = "selection.decision")]
    SelectionDecision,
    #[serde(rename = "streaming.start")]
    StreamingStart,
    #[serde(rename = "streaming.chunk")]
    StreamingChunk,
    #[serde(rename = "streaming.end")]
    StreamingEnd,
    #[serde(rename = "error.occurred")]
    ErrorOccurred,
    #[serde(rename = "performance.degradation")]
    PerformanceDegradation,
    #[serde(rename = "security.event")]
    SecurityEvent,
    #[serde(rename = "hitl.approval_required")]
    HitlApprovalRequired,
    #[serde(rename = "hitl.approval_granted")]
    HitlApprovalGranted,
    #[serde(rename = "hitl.approval_denied")]
    HitlApprovalDenied,
    #[serde(rename = "pricing_fallback")]
    PricingFallback,
    #[serde(rename = "slow_consumer")]
    SlowConsumer,
}

impl EventName {
    /// The wire string (same as the serde rename).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::ConversationStart => "conversation.start",
            EventName::ConversationEnd => "conversation.end",
            EventName::AgentInvocation => "agent.invocation",
            EventName::AgentResponse => "agent.response",
            EventName::ToolCall => "tool.call",
            EventName::ToolResult => "tool.result",
            EventName::DecisionMade => "decision.made",
            EventName::ToolInvoked => "tool.invoked",
            EventName::BudgetEvent => "budget.event",
            EventName::WorkflowStart => "workflow.start",
            EventName::WorkflowStep => "workflow.step",
            EventName::WorkflowEnd => "workflow.end",
            EventName::CostTracked => "cost.tracked",
            EventName::BudgetWarning => "budget.warning",
            EventName::BudgetExceeded => "budget.exceeded",
            EventName::MemoryAccess => "memory.access",
            EventName::MemoryUpdate => "memory.update",
            EventName::SelectionDecision => "selection.decision",
            EventName::StreamingStart => "streaming.start",
            EventName::StreamingChunk => "streaming.chunk",
            EventName::StreamingEnd => "streaming.end",
            EventName::ErrorOccurred => "error.occurred",
            EventName::PerformanceDegradation => "performance.degradation",
            EventName::SecurityEvent => "security.event",
            EventName::HitlApprovalRequired => "hitl.approval_required",
            EventName::HitlApprovalGranted => "hitl.approval_granted",
            EventName::HitlApprovalDenied => "hitl.approval_denied",
            EventName::PricingFallback => "pricing_fallback",
            EventName::SlowConsumer => "slow_consumer",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct OrchEvent {
    #[serde(rename = "type")]
    pub name: EventName,
    #[serde(skip_serializing_if = "Option::is_none", rename = "conversationID")]
    pub conversation_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "userID")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "agentID")]
    pub agent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl OrchEvent {
    pub fn new(name: EventName) -> Self {
        Self {
            name,
            conversation_id: None,
            user_id: None,
            agent_id: None,
            timestamp: Utc::now(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn conversation(mut self, id: Uuid) -> Self {
        self.conversation_id = Some(id);
        self
    }

    pub fn user(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    pub fn agent(mut self, id: impl Into<String>) -> Self {
        self.agent_id = Some(id.into());
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Capability handle for emitting events. Library crates (ledger, breaker)
/// accept this instead of depending on the observability pipeline.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: OrchEvent);
}

/// Sink that drops everything. Default for tests and embedded use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: OrchEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_name_matches_as_str() {
        for name in [
            EventName::ConversationStart,
            EventName::BudgetExceeded,
            EventName::HitlApprovalRequired,
            EventName::StreamingChunk,
            EventName::PricingFallback,
        ] {
            let json = serde_json::to_string(&name).unwrap();
            assert_eq!(json, format!("\"{}\"", name.as_str()));
        }
    }

    #[test]
    fn event_envelope_fields() {
        let conv = Uuid::new_v4();
        let ev = OrchEvent::new(EventName::CostTracked)
            .conversation(conv)
            .user("u1")
            .agent("amy_cfo")
            .payload(serde_json::json!({"totalCostUSD": "0.001"}));
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "cost.tracked");
        assert_eq!(v["conversationID"], serde_json::json!(conv));
        assert_eq!(v["userID"], "u1");
        assert_eq!(v["agentID"], "amy_cfo");
        assert!(v.get("timestamp").is_some());
    }
}
