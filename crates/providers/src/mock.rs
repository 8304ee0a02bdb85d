//! Scripted model client for tests, benchmarks, and offline runs.
//!
//! Each call pops the next [`ScriptedTurn`]; when the script runs dry the
//! client echoes the last user message. Optional pre-stream failures let
//! retry paths be exercised deterministically.

use std::sync::Arc;

use parking_lot::Mutex;

use orch_domain::stream::{BoxStream, ModelEvent, Usage};
use orch_domain::tool::{Role, ToolCall};
use orch_domain::{Error, Result};

use crate::traits::{CompletionRequest, ModelClient};

/// One scripted model response.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    /// Text chunks streamed in order.
    pub chunks: Vec<String>,
    /// Tool calls emitted after the text.
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    /// Fail this many times with a transient error before streaming.
    pub transient_failures: u32,
    /// Delay between chunks (cancellation tests).
    pub chunk_delay: Option<std::time::Duration>,
}

impl ScriptedTurn {
    pub fn text(content: &str) -> Self {
        Self {
            chunks: content
                .split_inclusive(' ')
                .map(String::from)
                .collect(),
            usage: Usage { input_tokens: 10, output_tokens: content.split_whitespace().count() as u32 },
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.usage = Usage { input_tokens, output_tokens };
        self
    }

    pub fn with_tool_call(mut self, call_id: &str, tool: &str, arguments: serde_json::Value) -> Self {
        self.tool_calls.push(ToolCall {
            call_id: call_id.into(),
            tool_name: tool.into(),
            arguments,
        });
        self
    }

    pub fn with_transient_failures(mut self, n: u32) -> Self {
        self.transient_failures = n;
        self
    }

    pub fn with_chunk_delay(mut self, delay: std::time::Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }
}

pub struct MockModelClient {
    provider_id: String,
    default_model: String,
    script: Mutex<Vec<ScriptedTurn>>,
    calls: std::sync::atomic::AtomicU64,
}

impl MockModelClient {
    pub fn new(provider_id: &str, default_model: &str, script: Vec<ScriptedTurn>) -> Self {
        Self {
            provider_id: provider_id.into(),
            default_model: default_model.into(),
            script: Mutex::new(script),
            calls: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// A client with an empty script: every call echoes the user message.
    pub fn echo(provider_id: &str, default_model: &str) -> Self {
        Self::new(provider_id, default_model, Vec::new())
    }

    /// Number of completed `complete_stream` calls.
    pub fn call_count(&self) -> u64 {
        self.calls.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn next_turn(&self, req: &CompletionRequest) -> ScriptedTurn {
        let mut script = self.script.lock();
        if script.is_empty() {
            let last_user = req
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            ScriptedTurn::text(&format!("echo: {last_user}"))
        } else {
            script.remove(0)
        }
    }
}

#[async_trait::async_trait]
impl ModelClient for MockModelClient {
    async fn complete_stream(
        &self,
        req: CompletionRequest,
    ) -> Result<BoxStream<'static, Result<ModelEvent>>> {
        let mut turn = self.next_turn(&req);

        if turn.transient_failures > 0 {
            turn.transient_failures -= 1;
            let remaining = turn.transient_failures;
            self.script.lock().insert(0, turn);
            return Err(Error::Transient(format!(
                "scripted transient failure ({remaining} more)"
            )));
        }

        self.calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let stream = async_stream::stream! {
            for chunk in turn.chunks {
                if let Some(delay) = turn.chunk_delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(ModelEvent::Token { text: chunk });
            }
            for tc in turn.tool_calls {
                yield Ok(ModelEvent::ToolCall(tc));
            }
            yield Ok(ModelEvent::Done {
                usage: Some(turn.usage),
                finish_reason: Some("stop".into()),
            });
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}
