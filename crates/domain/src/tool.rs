//! Provider-agnostic message and tool types, plus the tool contract.
//!
//! Every model adapter converts its wire format to these shapes; the tool
//! executor consumes [`ToolCall`]s and produces [`ToolOutcome`]s.

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool calls & results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool invocation emitted by a model.
///
/// Wire shape: `{function: {name, arguments: <json string>}}`; adapters
/// parse `arguments` into a JSON value before it reaches the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Structured result of one tool invocation. Failures are captured here,
/// not raised — one failing tool never aborts the batch unless the plan
/// marks it required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub call_id: String,
    pub tool_name: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
    /// Machine-readable failure class: "tool_not_found", "invoke_error".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl ToolOutcome {
    pub fn ok(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            content: content.into(),
            is_error: false,
            error_kind: None,
        }
    }

    pub fn failed(call: &ToolCall, kind: &str, message: impl Into<String>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            content: message.into(),
            is_error: true,
            error_kind: Some(kind.to_string()),
        }
    }

    pub fn not_found(call: &ToolCall) -> Self {
        Self::failed(call, "tool_not_found", format!("unknown tool: {}", call.tool_name))
    }
}

/// Tool definition exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// Uniform contract every tool implements. Implementations live outside the
/// core; the executor only sees this trait.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn definition(&self) -> ToolDefinition;

    async fn invoke(&self, arguments: serde_json::Value) -> Result<serde_json::Value>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the prompt assembled for a model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Present on tool-result messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: text.into(), tool_call_id: None }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: text.into(), tool_call_id: None }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: text.into(), tool_call_id: None }
    }
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> ToolCall {
        ToolCall {
            call_id: "tc_1".into(),
            tool_name: "web_search".into(),
            arguments: serde_json::json!({"query": "cac trend"}),
        }
    }

    #[test]
    fn outcome_ok_carries_ids() {
        let out = ToolOutcome::ok(&call(), "ten results");
        assert_eq!(out.call_id, "tc_1");
        assert_eq!(out.tool_name, "web_search");
        assert!(!out.is_error);
        assert!(out.error_kind.is_none());
    }

    #[test]
    fn not_found_is_structured() {
        let out = ToolOutcome::not_found(&call());
        assert!(out.is_error);
        assert_eq!(out.error_kind.as_deref(), Some("tool_not_found"));
        assert!(out.content.contains("web_search"));
    }

    #[test]
    fn tool_result_message_has_call_id() {
        let msg = Message::tool_result("tc_9", "done");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("tc_9"));
    }
}
