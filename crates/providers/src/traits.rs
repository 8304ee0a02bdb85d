use orch_domain::stream::{BoxStream, ModelEvent, Usage};
use orch_domain::tool::{Message, ToolCall, ToolDefinition};
use orch_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Model identifier. When `None`, the client uses its default.
    pub model: Option<String>,
}

/// A fully-drained completion (non-streaming surface).
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    /// The model that actually produced the response.
    pub model: String,
    pub finish_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core client trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every model adapter implements. The runtime only streams;
/// `complete` exists for callers that want the drained response.
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    /// Stream a completion as [`ModelEvent`]s, ending with `Done`.
    async fn complete_stream(
        &self,
        req: CompletionRequest,
    ) -> Result<BoxStream<'static, Result<ModelEvent>>>;

    /// Drain `complete_stream` into one response.
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse> {
        use futures_util::StreamExt;

        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model().to_string());
        let mut stream = self.complete_stream(req).await?;
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = Usage::default();
        let mut finish_reason = None;
        while let Some(event) = stream.next().await {
            match event? {
                ModelEvent::Token { text } => content.push_str(&text),
                ModelEvent::ToolCall(tc) => tool_calls.push(tc),
                ModelEvent::Done { usage: u, finish_reason: fr } => {
                    if let Some(u) = u {
                        usage = u;
                    }
                    finish_reason = fr;
                }
            }
        }
        Ok(CompletionResponse { content, tool_calls, usage, model, finish_reason })
    }

    /// A unique identifier for this provider instance ("openai", ...).
    fn provider_id(&self) -> &str;

    /// The model used when a request does not name one.
    fn default_model(&self) -> &str;
}
