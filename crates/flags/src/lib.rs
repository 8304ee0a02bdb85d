//! Feature flags with deterministic rollout strategies.
//!
//! The flag table is an immutable snapshot behind a lock; updates build a
//! fresh table and swap it, so readers never observe a half-applied
//! change. `is_enabled` is a pure function of (flag config, user, group,
//! time) — the same inputs always give the same answer.

pub mod hashing;
pub mod store;
pub mod strategy;

pub use store::{FlagStore, FlagUsage, UsageAction};
pub use strategy::{FeatureFlag, Strategy};

/// Flags the runtime consults. Defined here so call sites and seeds share
/// one set of names.
pub mod names {
    /// Gates the per-turn RAG injector.
    pub const PER_TURN_RAG: &str = "per_turn_rag";
    /// Gates the human-in-the-loop approval flow.
    pub const HITL_APPROVAL: &str = "hitl_approval";
    /// Gates the swarm coordination pattern.
    pub const SWARM_PATTERN: &str = "swarm_pattern";
    /// Gates speaker-selection rationale events.
    pub const SELECTION_EVENTS: &str = "selection_events";
}
