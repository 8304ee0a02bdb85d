//! Conversation-level cost analytics and the advisory recommender.
//!
//! Everything here is derived from the append-only cost records; nothing
//! feeds back into enforcement.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use orch_domain::{Money, Result};

use crate::costbook::{CostLedger, CostRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTrend {
    Increasing,
    Stable,
    Decreasing,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationAnalytics {
    pub conversation_id: Uuid,
    pub turns: usize,
    pub total_cost: Money,
    pub avg_cost_per_turn: Money,
    pub by_model: HashMap<String, Money>,
    pub by_agent: HashMap<String, Money>,
    pub trend: CostTrend,
    pub recommendations: Vec<String>,
}

/// Advisory efficiency score in [0, 1] — the mean of three clamped
/// signals: the model's cost-tier score, output/input token balance, and
/// characters delivered per dollar.
pub fn efficiency_score(tier_score: f64, input_tokens: u64, output_tokens: u64, output_chars: u64, cost: Money) -> f64 {
    let clamp = |v: f64| v.clamp(0.0, 1.0);

    let balance = if input_tokens == 0 {
        if output_tokens > 0 { 1.0 } else { 0.0 }
    } else {
        clamp(output_tokens as f64 / (2.0 * input_tokens as f64))
    };

    let cost_f = cost.to_f64_lossy();
    let value = if cost_f <= 0.0 {
        1.0
    } else {
        clamp(output_chars as f64 / (1000.0 * cost_f))
    };

    (clamp(tier_score) + balance + value) / 3.0
}

/// Compare the mean of the last third of turns against the first third,
/// with a 20 % band counting as stable.
fn detect_trend(records: &[CostRecord]) -> CostTrend {
    if records.len() < 3 {
        return CostTrend::Stable;
    }
    let third = records.len() / 3;
    let mean = |slice: &[CostRecord]| -> f64 {
        let total: Money = slice.iter().map(|r| r.total_cost_usd).sum();
        total.to_f64_lossy() / slice.len() as f64
    };
    let early = mean(&records[..third]);
    let late = mean(&records[records.len() - third..]);
    if early <= 0.0 {
        return if late > 0.0 { CostTrend::Increasing } else { CostTrend::Stable };
    }
    let ratio = late / early;
    if ratio > 1.2 {
        CostTrend::Increasing
    } else if ratio < 0.8 {
        CostTrend::Decreasing
    } else {
        CostTrend::Stable
    }
}

fn build_recommendations(
    records: &[CostRecord],
    by_model: &HashMap<String, Money>,
    total: Money,
    trend: CostTrend,
) -> Vec<String> {
    let mut recs = Vec::new();

    if trend == CostTrend::Increasing {
        recs.push("per-turn cost is trending up — check for prompt growth or runaway tool loops".to_string());
    }

    // Dominant expensive model.
    if !total.is_zero() {
        for (model, cost) in by_model {
            let share = cost.utilization(total);
            if share > 0.8 && records.len() >= 4 {
                recs.push(format!(
                    "model {model} accounts for {:.0}% of spend — consider a cheaper tier for routine turns",
                    share * 100.0
                ));
            }
        }
    }

    let avg_out = records.iter().map(|r| r.output_tokens).sum::<u64>() as f64
        / records.len().max(1) as f64;
    if avg_out < 20.0 && records.len() >= 3 {
        recs.push("responses are very short for the tokens paid — prompts may carry unused context".to_string());
    }

    recs
}

impl CostLedger {
    /// Aggregate view of a conversation's spend.
    pub async fn conversation_analytics(&self, conversation_id: Uuid) -> Result<ConversationAnalytics> {
        let records = self.records(conversation_id).await?;

        let total_cost: Money = records.iter().map(|r| r.total_cost_usd).sum();
        let mut by_model: HashMap<String, Money> = HashMap::new();
        let mut by_agent: HashMap<String, Money> = HashMap::new();
        for r in &records {
            *by_model.entry(r.model.clone()).or_default() += r.total_cost_usd;
            *by_agent.entry(r.agent_id.clone()).or_default() += r.total_cost_usd;
        }

        let avg = if records.is_empty() {
            Money::ZERO
        } else {
            Money::new(total_cost.as_decimal() / rust_decimal::Decimal::from(records.len()))
        };

        let trend = detect_trend(&records);
        let recommendations = build_recommendations(&records, &by_model, total_cost, trend);

        Ok(ConversationAnalytics {
            conversation_id,
            turns: records.len(),
            total_cost,
            avg_cost_per_turn: avg,
            by_model,
            by_agent,
            trend,
            recommendations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(model: &str, agent: &str, cost: &str, out_tokens: u64) -> CostRecord {
        CostRecord {
            id: Uuid::new_v4(),
            conversation_id: Uuid::nil(),
            turn_id: Uuid::new_v4(),
            provider: "openai".into(),
            model: model.into(),
            agent_id: agent.into(),
            input_tokens: 100,
            output_tokens: out_tokens,
            input_cost_usd: Money::ZERO,
            output_cost_usd: Money::ZERO,
            total_cost_usd: Money::parse(cost).unwrap(),
            latency_ms: 10,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn trend_detection() {
        let flat: Vec<_> = (0..6).map(|_| record("m", "a", "0.01", 100)).collect();
        assert_eq!(detect_trend(&flat), CostTrend::Stable);

        let rising: Vec<_> = ["0.01", "0.01", "0.02", "0.03", "0.05", "0.08"]
            .iter()
            .map(|c| record("m", "a", c, 100))
            .collect();
        assert_eq!(detect_trend(&rising), CostTrend::Increasing);

        let falling: Vec<_> = ["0.08", "0.05", "0.03", "0.02", "0.01", "0.01"]
            .iter()
            .map(|c| record("m", "a", c, 100))
            .collect();
        assert_eq!(detect_trend(&falling), CostTrend::Decreasing);

        assert_eq!(detect_trend(&[]), CostTrend::Stable);
    }

    #[test]
    fn efficiency_score_clamps_components() {
        // Cheap tier, balanced output, good value — high score.
        let high = efficiency_score(1.0, 100, 200, 5000, Money::parse("0.001").unwrap());
        assert!(high > 0.9);

        // Premium tier, tiny output, poor value — low score.
        let low = efficiency_score(0.3, 1000, 10, 50, Money::parse("1.0").unwrap());
        assert!(low < 0.2);

        // Free turn is maximal value.
        let free = efficiency_score(1.0, 0, 0, 0, Money::ZERO);
        assert!((free - (1.0 + 0.0 + 1.0) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn recommendations_flag_dominant_model() {
        let mut by_model = HashMap::new();
        by_model.insert("gpt-4o".to_string(), Money::parse("0.9").unwrap());
        by_model.insert("gpt-4o-mini".to_string(), Money::parse("0.1").unwrap());
        let records: Vec<_> = (0..5).map(|_| record("gpt-4o", "a", "0.18", 100)).collect();
        let recs = build_recommendations(
            &records,
            &by_model,
            Money::parse("1.0").unwrap(),
            CostTrend::Stable,
        );
        assert!(recs.iter().any(|r| r.contains("gpt-4o")));
    }
}
