//! Tool execution for a turn.
//!
//! The executor runs the calls a model emitted, in plan order when a
//! [`DecisionPlan`] is present, recording a `tool.invoked` event per call
//! with truncated arguments. Failures become structured results; only a
//! step the plan marks `required` aborts the batch.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use orch_domain::event::{EventName, EventSink, OrchEvent};
use orch_domain::tool::{Tool, ToolCall, ToolDefinition, ToolOutcome};

use super::truncate_str;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tools available to the process, keyed by name. Agent descriptors
/// narrow this to their `toolIDs`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions for the given tool ids, skipping unknown ids.
    pub fn definitions_for(&self, tool_ids: &[String]) -> Vec<ToolDefinition> {
        tool_ids
            .iter()
            .filter_map(|id| self.tools.get(id))
            .map(|t| t.definition())
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decision plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execution policy for a batch of tool calls. `ordering` lists tool
/// names to run first, in priority order; unlisted tools follow in the
/// order the model emitted them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionPlan {
    #[serde(default)]
    pub ordering: Vec<String>,
    /// Tools whose failure aborts the remainder of the batch.
    #[serde(default)]
    pub required: Vec<String>,
}

impl DecisionPlan {
    /// The conventional research plan: web results before anything else.
    pub fn web_first() -> Self {
        Self {
            ordering: vec!["web_search".into()],
            required: Vec::new(),
        }
    }

    fn priority(&self, tool_name: &str) -> usize {
        self.ordering
            .iter()
            .position(|t| t == tool_name)
            .unwrap_or(self.ordering.len())
    }

    fn is_required(&self, tool_name: &str) -> bool {
        self.required.iter().any(|t| t == tool_name)
    }

    /// Stable sort: plan priority first, emission order within a rank.
    pub fn order<'a>(&self, calls: &'a [ToolCall]) -> Vec<&'a ToolCall> {
        let mut ordered: Vec<&ToolCall> = calls.iter().collect();
        ordered.sort_by_key(|c| self.priority(&c.tool_name));
        ordered
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolExecutor<'a> {
    registry: &'a ToolRegistry,
    sink: &'a dyn EventSink,
    /// Byte cap for argument previews in events.
    arg_preview_len: usize,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(registry: &'a ToolRegistry, sink: &'a dyn EventSink, arg_preview_len: usize) -> Self {
        Self { registry, sink, arg_preview_len }
    }

    /// Run a batch of tool calls. Results come back in execution order
    /// (plan order when a plan is given).
    pub async fn execute(
        &self,
        conversation_id: Uuid,
        agent_id: &str,
        calls: &[ToolCall],
        plan: Option<&DecisionPlan>,
    ) -> Vec<ToolOutcome> {
        let default_plan = DecisionPlan::default();
        let plan = plan.unwrap_or(&default_plan);
        let ordered = plan.order(calls);

        let mut outcomes = Vec::with_capacity(ordered.len());
        for call in ordered {
            let preview = truncate_str(&call.arguments.to_string(), self.arg_preview_len);
            self.sink.emit(
                OrchEvent::new(EventName::ToolInvoked)
                    .conversation(conversation_id)
                    .agent(agent_id)
                    .payload(serde_json::json!({
                        "tool": call.tool_name,
                        "callID": call.call_id,
                        "arguments": preview,
                    })),
            );

            let outcome = self.invoke_one(call).await;
            self.sink.emit(
                OrchEvent::new(EventName::ToolResult)
                    .conversation(conversation_id)
                    .agent(agent_id)
                    .payload(serde_json::json!({
                        "tool": call.tool_name,
                        "callID": call.call_id,
                        "isError": outcome.is_error,
                    })),
            );

            let abort = outcome.is_error && plan.is_required(&call.tool_name);
            outcomes.push(outcome);
            if abort {
                tracing::warn!(tool = %call.tool_name, "required tool failed; aborting batch");
                break;
            }
        }
        outcomes
    }

    async fn invoke_one(&self, call: &ToolCall) -> ToolOutcome {
        let Some(tool) = self.registry.get(&call.tool_name) else {
            return ToolOutcome::not_found(call);
        };

        let span = tracing::info_span!("tool.call", tool_name = %call.tool_name);
        match tool
            .invoke(call.arguments.clone())
            .instrument(span)
            .await
        {
            Ok(value) => {
                let content = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                ToolOutcome::ok(call, content)
            }
            Err(e) => ToolOutcome::failed(call, "invoke_error", e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_domain::event::NullSink;
    use orch_domain::{Error, Result};

    struct FakeTool {
        name: &'static str,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Tool for FakeTool {
        fn name(&self) -> &str {
            self.name
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.name.into(),
                description: format!("fake {}", self.name),
                parameters: serde_json::json!({"type": "object"}),
            }
        }

        async fn invoke(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
            if self.fail {
                Err(Error::ToolFailed {
                    tool: self.name.into(),
                    message: "boom".into(),
                })
            } else {
                Ok(serde_json::json!(format!("{}:{}", self.name, arguments)))
            }
        }
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        r.register(Arc::new(FakeTool { name: "web_search", fail: false }));
        r.register(Arc::new(FakeTool { name: "sql_query", fail: false }));
        r.register(Arc::new(FakeTool { name: "flaky", fail: true }));
        r
    }

    fn call(id: &str, tool: &str) -> ToolCall {
        ToolCall {
            call_id: id.into(),
            tool_name: tool.into(),
            arguments: serde_json::json!({"q": "x"}),
        }
    }

    #[tokio::test]
    async fn executes_in_emission_order_without_plan() {
        let registry = registry();
        let executor = ToolExecutor::new(&registry, &NullSink, 200);
        let calls = vec![call("1", "sql_query"), call("2", "web_search")];
        let outcomes = executor.execute(Uuid::new_v4(), "a", &calls, None).await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].tool_name, "sql_query");
        assert_eq!(outcomes[1].tool_name, "web_search");
    }

    #[tokio::test]
    async fn plan_reorders_web_first() {
        let registry = registry();
        let executor = ToolExecutor::new(&registry, &NullSink, 200);
        let calls = vec![call("1", "sql_query"), call("2", "web_search")];
        let plan = DecisionPlan::web_first();
        let outcomes = executor.execute(Uuid::new_v4(), "a", &calls, Some(&plan)).await;
        assert_eq!(outcomes[0].tool_name, "web_search");
        assert_eq!(outcomes[1].tool_name, "sql_query");
    }

    #[tokio::test]
    async fn unknown_tool_yields_structured_not_found() {
        let registry = registry();
        let executor = ToolExecutor::new(&registry, &NullSink, 200);
        let calls = vec![call("1", "teleport"), call("2", "web_search")];
        let outcomes = executor.execute(Uuid::new_v4(), "a", &calls, None).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_error);
        assert_eq!(outcomes[0].error_kind.as_deref(), Some("tool_not_found"));
        // The batch continued.
        assert!(!outcomes[1].is_error);
    }

    #[tokio::test]
    async fn failing_tool_does_not_abort_batch() {
        let registry = registry();
        let executor = ToolExecutor::new(&registry, &NullSink, 200);
        let calls = vec![call("1", "flaky"), call("2", "web_search")];
        let outcomes = executor.execute(Uuid::new_v4(), "a", &calls, None).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_error);
        assert!(!outcomes[1].is_error);
    }

    #[tokio::test]
    async fn required_failure_aborts_batch() {
        let registry = registry();
        let executor = ToolExecutor::new(&registry, &NullSink, 200);
        let calls = vec![call("1", "flaky"), call("2", "web_search")];
        let plan = DecisionPlan {
            ordering: vec![],
            required: vec!["flaky".into()],
        };
        let outcomes = executor.execute(Uuid::new_v4(), "a", &calls, Some(&plan)).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_error);
    }

    #[test]
    fn definitions_for_skips_unknown_ids() {
        let registry = registry();
        let defs = registry.definitions_for(&["web_search".into(), "ghost".into()]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "web_search");
    }
}
