use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// A boxed async stream, used for model streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted while a model streams a completion (provider-agnostic).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ModelEvent {
    /// A text token chunk.
    #[serde(rename = "token")]
    Token { text: String },

    /// A complete tool call assembled by the adapter.
    #[serde(rename = "tool_call")]
    ToolCall(crate::tool::ToolCall),

    /// Stream finished.
    #[serde(rename = "done")]
    Done { usage: Option<Usage>, finish_reason: Option<String> },
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}
