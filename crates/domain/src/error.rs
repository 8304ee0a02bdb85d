/// Shared error type used across all orch crates.
///
/// Expected policy outcomes (circuit open, budget exceeded, approval
/// required) are modelled as variants so callers can match on them instead
/// of parsing strings. `kind()` yields the stable wire identifier used in
/// API error payloads and stream events.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("circuit open: {0}")]
    CircuitOpen(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Transient backend failure — the caller may retry with backoff.
    #[error("transient: {0}")]
    Transient(String),

    /// Concurrent-write conflict — the caller must reconcile and retry.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("tool {tool}: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("security validation: {0}")]
    SecurityValidation(String),

    #[error("cancelled")]
    Cancelled,

    #[error("model {provider}: {message}")]
    Model { provider: String, message: String },

    #[error("memory store: {0}")]
    MemoryStore(String),

    #[error("config: {0}")]
    Config(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Stable identifier for API payloads (`{"error": {"kind": ...}}`).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::CircuitOpen(_) => "circuit_open",
            Error::BudgetExceeded(_) => "budget_exceeded",
            Error::Transient(_) => "transient_backend",
            Error::Conflict(_) => "conflict",
            Error::ToolFailed { .. } => "tool_failed",
            Error::SecurityValidation(_) => "validation_security",
            Error::Cancelled => "cancelled",
            Error::Config(_) => "config",
            _ => "internal",
        }
    }

    /// Whether a bounded-backoff retry is appropriate.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable() {
        assert_eq!(Error::InvalidInput("x".into()).kind(), "invalid_input");
        assert_eq!(Error::CircuitOpen("x".into()).kind(), "circuit_open");
        assert_eq!(Error::BudgetExceeded("x".into()).kind(), "budget_exceeded");
        assert_eq!(Error::Transient("x".into()).kind(), "transient_backend");
        assert_eq!(Error::Cancelled.kind(), "cancelled");
        assert_eq!(Error::Internal("x".into()).kind(), "internal");
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(Error::Transient("flaky".into()).is_retryable());
        assert!(!Error::BudgetExceeded("over".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }
}
