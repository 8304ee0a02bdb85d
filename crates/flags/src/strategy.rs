//! Flag definitions and strategy evaluation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orch_domain::config::FlagSpec;
use orch_domain::{Error, Result};

use crate::hashing;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Strategy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    Off,
    On,
    Percentage {
        percentage: f64,
    },
    UserWhitelist {
        users: Vec<String>,
    },
    GroupWhitelist {
        groups: Vec<String>,
    },
    /// Linear ramp from 0 to `target_percentage` between the two instants,
    /// then plain percentage semantics at the target.
    Gradual {
        rollout_start: DateTime<Utc>,
        rollout_end: DateTime<Utc>,
        target_percentage: f64,
    },
    /// Whitelisted users plus a percentage of everyone else.
    Canary {
        users: Vec<String>,
        percentage: f64,
    },
    /// Deterministic variant assignment; enabled for every non-control
    /// bucket, `variant()` names the bucket.
    AbTest {
        variants: Vec<String>,
    },
}

impl Strategy {
    pub fn from_spec(spec: &FlagSpec) -> Result<Strategy> {
        let pct = || -> Result<f64> {
            spec.percentage.ok_or_else(|| {
                Error::Config(format!("flag {}: strategy needs `percentage`", spec.name))
            })
        };
        match spec.strategy.as_str() {
            "off" => Ok(Strategy::Off),
            "on" => Ok(Strategy::On),
            "percentage" => Ok(Strategy::Percentage { percentage: pct()? }),
            "user_whitelist" => Ok(Strategy::UserWhitelist { users: spec.whitelist_users.clone() }),
            "group_whitelist" => Ok(Strategy::GroupWhitelist { groups: spec.whitelist_groups.clone() }),
            "gradual" => {
                let (start, end) = match (spec.rollout_start, spec.rollout_end) {
                    (Some(s), Some(e)) if s < e => (s, e),
                    _ => {
                        return Err(Error::Config(format!(
                            "flag {}: gradual needs rollout_start < rollout_end",
                            spec.name
                        )))
                    }
                };
                Ok(Strategy::Gradual {
                    rollout_start: start,
                    rollout_end: end,
                    target_percentage: spec.target_percentage.unwrap_or(100.0),
                })
            }
            "canary" => Ok(Strategy::Canary {
                users: spec.whitelist_users.clone(),
                percentage: spec.percentage.unwrap_or(0.0),
            }),
            "ab_test" => {
                if spec.variants.is_empty() {
                    return Err(Error::Config(format!("flag {}: ab_test needs variants", spec.name)));
                }
                Ok(Strategy::AbTest { variants: spec.variants.clone() })
            }
            other => Err(Error::Config(format!("flag {}: unknown strategy {other}", spec.name))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FeatureFlag
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub name: String,
    pub enabled: bool,
    pub strategy: Strategy,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub conflicts_with: Vec<String>,
}

impl FeatureFlag {
    pub fn from_spec(spec: &FlagSpec) -> Result<Self> {
        Ok(Self {
            name: spec.name.clone(),
            enabled: spec.enabled,
            strategy: Strategy::from_spec(spec)?,
            updated_at: Utc::now(),
            depends_on: spec.depends_on.clone(),
            conflicts_with: spec.conflicts_with.clone(),
        })
    }

    /// Evaluate the strategy only — dependency/conflict rules are the
    /// store's job. Deterministic in (self, user, group, now).
    pub fn strategy_allows(&self, user_id: Option<&str>, group_id: Option<&str>, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.strategy {
            Strategy::Off => false,
            Strategy::On => true,
            Strategy::Percentage { percentage } => match user_id {
                Some(user) => hashing::percent_bucket(&self.name, user) < *percentage,
                None => false,
            },
            Strategy::UserWhitelist { users } => {
                user_id.is_some_and(|u| users.iter().any(|w| w == u))
            }
            Strategy::GroupWhitelist { groups } => {
                group_id.is_some_and(|g| groups.iter().any(|w| w == g))
            }
            Strategy::Gradual { rollout_start, rollout_end, target_percentage } => {
                let effective = if now <= *rollout_start {
                    0.0
                } else if now >= *rollout_end {
                    *target_percentage
                } else {
                    let span = (*rollout_end - *rollout_start).num_seconds().max(1) as f64;
                    let elapsed = (now - *rollout_start).num_seconds() as f64;
                    target_percentage * (elapsed / span)
                };
                match user_id {
                    Some(user) => hashing::percent_bucket(&self.name, user) < effective,
                    None => false,
                }
            }
            Strategy::Canary { users, percentage } => {
                if user_id.is_some_and(|u| users.iter().any(|w| w == u)) {
                    return true;
                }
                match user_id {
                    Some(user) => hashing::percent_bucket(&self.name, user) < *percentage,
                    None => false,
                }
            }
            Strategy::AbTest { .. } => self.variant(user_id) != "control",
        }
    }

    /// Variant assignment for A/B flags; non-A/B flags and anonymous users
    /// land in "control".
    pub fn variant(&self, user_id: Option<&str>) -> &str {
        match (&self.strategy, user_id) {
            (Strategy::AbTest { variants }, Some(user)) if !variants.is_empty() => {
                // One extra bucket is the control group.
                let idx = hashing::variant_index(&self.name, user, variants.len() + 1);
                if idx == variants.len() {
                    "control"
                } else {
                    &variants[idx]
                }
            }
            _ => "control",
        }
    }
}
