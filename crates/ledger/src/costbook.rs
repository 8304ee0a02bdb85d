//! Per-turn cost recording and budget classification.
//!
//! `record_turn` is the only write path for money: it appends the cost
//! record, bumps both counters, and returns the updated aggregates with a
//! budget classification the runtime acts on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use orch_domain::config::BudgetConfig;
use orch_domain::event::{EventName, EventSink, OrchEvent};
use orch_domain::{Money, Result};
use orch_statestore::{keys, StateStore};

use crate::pricing::{CostBreakdown, PricingTable};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append-only record of one turn's spend. The sum over a conversation
/// equals its cumulative cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub turn_id: Uuid,
    pub provider: String,
    pub model: String,
    pub agent_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost_usd: Money,
    pub output_cost_usd: Money,
    pub total_cost_usd: Money,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Usage facts the runtime hands to the ledger per turn.
#[derive(Debug, Clone)]
pub struct TurnUsage {
    pub conversation_id: Uuid,
    pub turn_id: Uuid,
    pub agent_id: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
}

/// Budget classification after a cost write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetStatus {
    Healthy,
    Warning,
    Critical,
    Exceeded,
}

impl BudgetStatus {
    pub fn classify(used: Money, limit: Money, warning: f64, critical: f64) -> Self {
        if limit.is_zero() {
            // No limit configured — always healthy.
            return BudgetStatus::Healthy;
        }
        let u = used.utilization(limit);
        if u >= 1.0 {
            BudgetStatus::Exceeded
        } else if u >= critical {
            BudgetStatus::Critical
        } else if u >= warning {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Healthy
        }
    }
}

/// The aggregates returned from a cost write.
#[derive(Debug, Clone)]
pub struct TurnCharge {
    pub breakdown: CostBreakdown,
    pub conv_total: Money,
    pub daily_total: Money,
    pub daily_status: BudgetStatus,
    pub conversation_status: BudgetStatus,
}

impl TurnCharge {
    /// The status the runtime reacts to: the worse of the two scopes.
    pub fn effective_status(&self) -> BudgetStatus {
        use BudgetStatus::*;
        match (self.daily_status, self.conversation_status) {
            (Exceeded, _) | (_, Exceeded) => Exceeded,
            (Critical, _) | (_, Critical) => Critical,
            (Warning, _) | (_, Warning) => Warning,
            _ => Healthy,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CostLedger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CostLedger {
    pricing: RwLock<Arc<PricingTable>>,
    store: Arc<StateStore>,
    budget: BudgetConfig,
    sink: Arc<dyn EventSink>,
}

impl CostLedger {
    pub fn new(
        pricing: PricingTable,
        store: Arc<StateStore>,
        budget: BudgetConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            pricing: RwLock::new(Arc::new(pricing)),
            store,
            budget,
            sink,
        }
    }

    pub fn budget(&self) -> &BudgetConfig {
        &self.budget
    }

    /// Swap in a new pricing table (admin reload).
    pub fn replace_pricing(&self, table: PricingTable) {
        *self.pricing.write() = Arc::new(table);
    }

    /// Pure pricing lookup. Emits `pricing_fallback` when no entry matched.
    pub fn price(&self, provider: &str, model: &str, input_tokens: u64, output_tokens: u64) -> CostBreakdown {
        let table = self.pricing.read().clone();
        let breakdown = table.price(provider, model, input_tokens, output_tokens);
        if breakdown.fallback {
            self.sink.emit(
                OrchEvent::new(EventName::PricingFallback)
                    .payload(serde_json::json!({ "provider": provider, "model": model })),
            );
        }
        breakdown
    }

    /// Record a turn's spend: append the record, bump both counters,
    /// classify the budget.
    pub async fn record_turn(&self, usage: TurnUsage) -> Result<TurnCharge> {
        let breakdown = self.price(
            &usage.provider,
            &usage.model,
            usage.input_tokens,
            usage.output_tokens,
        );

        let record = CostRecord {
            id: Uuid::new_v4(),
            conversation_id: usage.conversation_id,
            turn_id: usage.turn_id,
            provider: usage.provider,
            model: usage.model,
            agent_id: usage.agent_id,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            input_cost_usd: breakdown.input_cost,
            output_cost_usd: breakdown.output_cost,
            total_cost_usd: breakdown.total,
            latency_ms: usage.latency_ms,
            created_at: Utc::now(),
        };

        let ttls = self.store.ttls();
        self.store
            .push_list(
                &keys::cost_records(record.conversation_id),
                &serde_json::to_string(&record)?,
                Some(ttls.turn_detail),
            )
            .await?;

        let conv_total = self
            .store
            .incr_conversation_cost(record.conversation_id, record.total_cost_usd)
            .await?;
        let daily_total = self
            .store
            .incr_daily_cost(Utc::now().date_naive(), record.total_cost_usd)
            .await?;

        let daily_status = BudgetStatus::classify(
            daily_total,
            self.budget.daily_limit_usd,
            self.budget.warning_threshold,
            self.budget.critical_threshold,
        );
        let conversation_status = BudgetStatus::classify(
            conv_total,
            self.budget.conversation_limit_usd,
            self.budget.warning_threshold,
            self.budget.critical_threshold,
        );

        Ok(TurnCharge {
            breakdown,
            conv_total,
            daily_total,
            daily_status,
            conversation_status,
        })
    }

    /// All cost records of a conversation, oldest first.
    pub async fn records(&self, conversation_id: Uuid) -> Result<Vec<CostRecord>> {
        let raw = self
            .store
            .range_list(&keys::cost_records(conversation_id), 0, -1)
            .await?;
        let mut records = Vec::with_capacity(raw.len());
        for line in raw {
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }

    pub async fn daily_total(&self, date: chrono::NaiveDate) -> Result<Money> {
        self.store.get_daily_cost(date).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_domain::event::NullSink;
    use orch_statestore::{MemoryBackend, StoreTtls};

    fn ledger(daily_limit: &str) -> CostLedger {
        let store = Arc::new(StateStore::new(Arc::new(MemoryBackend::new()), StoreTtls::default()));
        let budget = BudgetConfig {
            daily_limit_usd: Money::parse(daily_limit).unwrap(),
            ..BudgetConfig::default()
        };
        CostLedger::new(PricingTable::builtin(), store, budget, Arc::new(NullSink))
    }

    fn usage(conv: Uuid, in_tok: u64, out_tok: u64) -> TurnUsage {
        TurnUsage {
            conversation_id: conv,
            turn_id: Uuid::new_v4(),
            agent_id: "amy_cfo".into(),
            provider: "openai".into(),
            model: "gpt-3.5-turbo".into(),
            input_tokens: in_tok,
            output_tokens: out_tok,
            latency_ms: 42,
        }
    }

    #[tokio::test]
    async fn record_turn_updates_both_aggregates() {
        let ledger = ledger("10");
        let conv = Uuid::new_v4();

        // 1000 in + 1000 out on gpt-3.5-turbo = 0.001 + 0.002 = 0.003
        let charge = ledger.record_turn(usage(conv, 1000, 1000)).await.unwrap();
        assert_eq!(charge.breakdown.total, Money::parse("0.003").unwrap());
        assert_eq!(charge.conv_total, Money::parse("0.003").unwrap());
        assert_eq!(charge.daily_total, Money::parse("0.003").unwrap());
        assert_eq!(charge.effective_status(), BudgetStatus::Healthy);

        let charge2 = ledger.record_turn(usage(conv, 1000, 1000)).await.unwrap();
        assert_eq!(charge2.conv_total, Money::parse("0.006").unwrap());
    }

    #[tokio::test]
    async fn records_sum_to_conversation_total() {
        let ledger = ledger("10");
        let conv = Uuid::new_v4();
        for _ in 0..4 {
            ledger.record_turn(usage(conv, 500, 250)).await.unwrap();
        }
        let records = ledger.records(conv).await.unwrap();
        assert_eq!(records.len(), 4);
        let sum: Money = records.iter().map(|r| r.total_cost_usd).sum();
        let total = ledger.store.get_conversation_cost(conv).await.unwrap();
        assert_eq!(sum, total);
    }

    #[tokio::test]
    async fn budget_classification_thresholds() {
        // daily limit 0.01: warning at 0.007, critical at 0.009
        let ledger = ledger("0.01");
        let conv = Uuid::new_v4();

        // 0.003 spent — healthy
        let c = ledger.record_turn(usage(conv, 1000, 1000)).await.unwrap();
        assert_eq!(c.daily_status, BudgetStatus::Healthy);

        // 0.006 — healthy, 0.009 — critical
        ledger.record_turn(usage(conv, 1000, 1000)).await.unwrap();
        let c = ledger.record_turn(usage(conv, 1000, 1000)).await.unwrap();
        assert_eq!(c.daily_status, BudgetStatus::Critical);

        // 0.012 — exceeded
        let c = ledger.record_turn(usage(conv, 1000, 1000)).await.unwrap();
        assert_eq!(c.daily_status, BudgetStatus::Exceeded);
        assert_eq!(c.effective_status(), BudgetStatus::Exceeded);
    }

    #[tokio::test]
    async fn zero_usage_records_zero_cost() {
        let ledger = ledger("10");
        let conv = Uuid::new_v4();
        let charge = ledger.record_turn(usage(conv, 0, 0)).await.unwrap();
        assert!(charge.breakdown.total.is_zero());
        assert!(charge.conv_total.is_zero());
    }

    #[test]
    fn classify_with_no_limit_is_healthy() {
        let status = BudgetStatus::classify(Money::parse("100").unwrap(), Money::ZERO, 0.7, 0.9);
        assert_eq!(status, BudgetStatus::Healthy);
    }

    #[test]
    fn effective_status_takes_the_worse_scope() {
        let charge = TurnCharge {
            breakdown: CostBreakdown {
                input_cost: Money::ZERO,
                output_cost: Money::ZERO,
                total: Money::ZERO,
                fallback: false,
            },
            conv_total: Money::ZERO,
            daily_total: Money::ZERO,
            daily_status: BudgetStatus::Warning,
            conversation_status: BudgetStatus::Exceeded,
        };
        assert_eq!(charge.effective_status(), BudgetStatus::Exceeded);
    }
}
