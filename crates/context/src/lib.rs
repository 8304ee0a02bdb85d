//! Per-turn retrieval-augmented context.
//!
//! Before an agent speaks, [`RagInjector::inject_context`] attaches the
//! top-k relevant facts from long-term memory, weighted by recency, plus a
//! condensed history view late in the conversation and an agent-specific
//! focus hint. Identical inputs within the cache TTL hit the cache and
//! never re-query the memory store.

pub mod cache;
pub mod grounding;
pub mod injector;

pub use cache::ContextCache;
pub use grounding::{coverage, extract_keywords, grounding_score};
pub use injector::{EnhancedMessage, RagInjector};
