//! The pricing table — append-only, effective-dated rows.
//!
//! The active entry for a (provider, model) at time t is the one whose
//! window contains t; loading rejects overlapping windows so there is at
//! most one. Pricing is deterministic: identical inputs always produce the
//! identical breakdown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orch_domain::config::PricingSpec;
use orch_domain::{Error, Money, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingEntry {
    pub provider: String,
    pub model: String,
    pub input_per_1k: Money,
    pub output_per_1k: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_request: Option<Money>,
    pub effective_from: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<DateTime<Utc>>,
}

impl PricingEntry {
    fn active_at(&self, t: DateTime<Utc>) -> bool {
        self.effective_from <= t && self.effective_to.map_or(true, |end| t < end)
    }

    fn overlaps(&self, other: &PricingEntry) -> bool {
        let self_end = self.effective_to.unwrap_or(DateTime::<Utc>::MAX_UTC);
        let other_end = other.effective_to.unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.effective_from < other_end && other.effective_from < self_end
    }
}

/// Cost of one model call, split by direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CostBreakdown {
    pub input_cost: Money,
    pub output_cost: Money,
    pub total: Money,
    /// True when no entry matched and the documented default applied.
    pub fallback: bool,
}

/// Default rates for unknown (provider, model) pairs, per 1k tokens.
const FALLBACK_INPUT_PER_1K: &str = "0.001";
const FALLBACK_OUTPUT_PER_1K: &str = "0.002";

#[derive(Debug)]
pub struct PricingTable {
    entries: Vec<PricingEntry>,
}

impl PricingTable {
    /// Build from config rows, validating the one-active-entry invariant.
    pub fn from_specs(specs: &[PricingSpec]) -> Result<Self> {
        let mut entries = Vec::with_capacity(specs.len());
        for spec in specs {
            let parse = |field: &str, raw: &str| -> Result<Money> {
                Money::parse(raw).ok_or_else(|| {
                    Error::Config(format!(
                        "pricing {}/{}: {field} is not a decimal: {raw}",
                        spec.provider, spec.model
                    ))
                })
            };
            entries.push(PricingEntry {
                provider: spec.provider.to_lowercase(),
                model: spec.model.clone(),
                input_per_1k: parse("input_per_1k", &spec.input_per_1k)?,
                output_per_1k: parse("output_per_1k", &spec.output_per_1k)?,
                per_request: match &spec.per_request {
                    Some(raw) => Some(parse("per_request", raw)?),
                    None => None,
                },
                effective_from: spec.effective_from.unwrap_or(DateTime::<Utc>::MIN_UTC),
                effective_to: spec.effective_to,
            });
        }

        let table = Self { entries };
        table.check_single_active()?;
        Ok(table)
    }

    /// The built-in seed rows used when no table is configured.
    pub fn builtin() -> Self {
        let row = |provider: &str, model: &str, input: &str, output: &str| PricingEntry {
            provider: provider.into(),
            model: model.into(),
            input_per_1k: Money::parse(input).expect("builtin rate"),
            output_per_1k: Money::parse(output).expect("builtin rate"),
            per_request: None,
            effective_from: DateTime::<Utc>::MIN_UTC,
            effective_to: None,
        };
        Self {
            entries: vec![
                row("openai", "gpt-4o", "0.005", "0.015"),
                row("openai", "gpt-4o-mini", "0.00015", "0.0006"),
                row("openai", "gpt-3.5-turbo", "0.001", "0.002"),
                row("anthropic", "claude-3-5-sonnet", "0.003", "0.015"),
                row("anthropic", "claude-3-haiku", "0.00025", "0.00125"),
                row("perplexity", "llama-3.1-sonar-large-128k-online", "0.001", "0.001"),
            ],
        }
    }

    fn check_single_active(&self) -> Result<()> {
        for (i, a) in self.entries.iter().enumerate() {
            for b in &self.entries[i + 1..] {
                if a.provider == b.provider && a.model == b.model && a.overlaps(b) {
                    return Err(Error::Config(format!(
                        "pricing {}/{}: overlapping effective windows",
                        a.provider, a.model
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn active_entry(&self, provider: &str, model: &str, t: DateTime<Utc>) -> Option<&PricingEntry> {
        let provider = provider.to_lowercase();
        self.entries
            .iter()
            .find(|e| e.provider == provider && e.model == model && e.active_at(t))
    }

    /// Price a call at time t. Unknown pairs use the documented fallback;
    /// the caller emits `pricing_fallback` when `breakdown.fallback`.
    pub fn price_at(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        t: DateTime<Utc>,
    ) -> CostBreakdown {
        match self.active_entry(provider, model, t) {
            Some(entry) => {
                let input_cost = Money::per_1k(entry.input_per_1k, input_tokens);
                let output_cost = Money::per_1k(entry.output_per_1k, output_tokens);
                let flat = entry.per_request.unwrap_or(Money::ZERO);
                CostBreakdown {
                    input_cost,
                    output_cost,
                    total: input_cost + output_cost + flat,
                    fallback: false,
                }
            }
            None => {
                let input_cost =
                    Money::per_1k(Money::parse(FALLBACK_INPUT_PER_1K).expect("const"), input_tokens);
                let output_cost =
                    Money::per_1k(Money::parse(FALLBACK_OUTPUT_PER_1K).expect("const"), output_tokens);
                CostBreakdown {
                    input_cost,
                    output_cost,
                    total: input_cost + output_cost,
                    fallback: true,
                }
            }
        }
    }

    pub fn price(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> CostBreakdown {
        self.price_at(provider, model, input_tokens, output_tokens, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_prices_exactly() {
        let table = PricingTable::builtin();
        // gpt-3.5-turbo: 0.001 in / 0.002 out per 1k
        let b = table.price("openai", "gpt-3.5-turbo", 1000, 500);
        assert_eq!(b.input_cost, Money::parse("0.001").unwrap());
        assert_eq!(b.output_cost, Money::parse("0.001").unwrap());
        assert_eq!(b.total, Money::parse("0.002").unwrap());
        assert!(!b.fallback);
    }

    #[test]
    fn pricing_is_deterministic() {
        let table = PricingTable::builtin();
        let a = table.price("anthropic", "claude-3-haiku", 1234, 5678);
        let b = table.price("anthropic", "claude-3-haiku", 1234, 5678);
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_model_falls_back() {
        let table = PricingTable::builtin();
        let b = table.price("acme", "quantum-1", 1000, 1000);
        assert!(b.fallback);
        assert_eq!(b.total, Money::parse("0.003").unwrap());
    }

    #[test]
    fn zero_tokens_cost_zero() {
        let table = PricingTable::builtin();
        let b = table.price("openai", "gpt-4o-mini", 0, 0);
        assert!(b.total.is_zero());
    }

    #[test]
    fn provider_lookup_ignores_case() {
        let table = PricingTable::builtin();
        let b = table.price("OpenAI", "gpt-4o-mini", 1000, 0);
        assert!(!b.fallback);
    }

    #[test]
    fn effective_dating_selects_one_entry() {
        let t0 = Utc::now();
        let specs = vec![
            PricingSpec {
                provider: "openai".into(),
                model: "gpt-x".into(),
                input_per_1k: "0.001".into(),
                output_per_1k: "0.002".into(),
                per_request: None,
                effective_from: None,
                effective_to: Some(t0),
            },
            PricingSpec {
                provider: "openai".into(),
                model: "gpt-x".into(),
                input_per_1k: "0.002".into(),
                output_per_1k: "0.004".into(),
                per_request: None,
                effective_from: Some(t0),
                effective_to: None,
            },
        ];
        let table = PricingTable::from_specs(&specs).unwrap();

        let before = table.price_at("openai", "gpt-x", 1000, 0, t0 - chrono::Duration::hours(1));
        assert_eq!(before.input_cost, Money::parse("0.001").unwrap());

        let after = table.price_at("openai", "gpt-x", 1000, 0, t0 + chrono::Duration::hours(1));
        assert_eq!(after.input_cost, Money::parse("0.002").unwrap());
    }

    #[test]
    fn overlapping_windows_are_rejected() {
        let specs = vec![
            PricingSpec {
                provider: "openai".into(),
                model: "gpt-x".into(),
                input_per_1k: "0.001".into(),
                output_per_1k: "0.002".into(),
                per_request: None,
                effective_from: None,
                effective_to: None,
            },
            PricingSpec {
                provider: "openai".into(),
                model: "gpt-x".into(),
                input_per_1k: "0.003".into(),
                output_per_1k: "0.006".into(),
                per_request: None,
                effective_from: None,
                effective_to: None,
            },
        ];
        let err = PricingTable::from_specs(&specs).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn bad_decimal_in_spec_is_config_error() {
        let specs = vec![PricingSpec {
            provider: "openai".into(),
            model: "gpt-x".into(),
            input_per_1k: "cheap".into(),
            output_per_1k: "0.002".into(),
            per_request: None,
            effective_from: None,
            effective_to: None,
        }];
        assert!(PricingTable::from_specs(&specs).is_err());
    }

    #[test]
    fn per_request_flat_fee_is_added() {
        let specs = vec![PricingSpec {
            provider: "perplexity".into(),
            model: "sonar-pro".into(),
            input_per_1k: "0.001".into(),
            output_per_1k: "0.001".into(),
            per_request: Some("0.005".into()),
            effective_from: None,
            effective_to: None,
        }];
        let table = PricingTable::from_specs(&specs).unwrap();
        let b = table.price("perplexity", "sonar-pro", 1000, 1000);
        assert_eq!(b.total, Money::parse("0.007").unwrap());
    }
}
