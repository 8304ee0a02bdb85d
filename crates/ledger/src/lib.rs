//! Cost accounting: the single pricing table, the single set of
//! aggregates, and the budget classification every turn passes through.
//!
//! One ledger per process. Per-turn charges are append-only records in the
//! state store; daily and per-conversation counters are incremented
//! atomically alongside them, so the persisted sums are the source of
//! truth and `Conversation.cumulative_cost_usd` is re-derivable.

pub mod analytics;
pub mod costbook;
pub mod pricing;

pub use analytics::{ConversationAnalytics, CostTrend};
pub use costbook::{BudgetStatus, CostLedger, CostRecord, TurnCharge, TurnUsage};
pub use pricing::{CostBreakdown, PricingEntry, PricingTable};
