//! Speaker selection: who answers this message.
//!
//! Scoring: keyword/capability match with phase weighting, registry
//! priority pins, a penalty for the agent that just spoke (unless the
//! message continues their thread), ties broken by cheaper cost tier then
//! lexicographic id.

use std::sync::Arc;

use serde::Serialize;

use orch_agents::AgentDescriptor;
use orch_domain::convo::MissionPhase;

/// Agents pinned for common coordination tasks; a small fixed set the
/// selector prefers when scores tie near zero.
const REGISTRY_PRIORITY: &[&str] = &[
    "ali_chief_of_staff",
    "wanda_workflow_orchestrator",
    "xavier_coordination_patterns",
];

/// Keyword groups with their reason codes and preferred capability tags.
const KEYWORD_GROUPS: &[(&str, &[&str], &[&str])] = &[
    (
        "finance_keywords",
        &["budget", "cost", "finance", "cac", "revenue", "forecast"],
        &["finance", "budget", "forecasting"],
    ),
    (
        "security_keywords",
        &["risk", "security", "compliance", "breach", "audit"],
        &["security", "risk", "compliance"],
    ),
    (
        "strategy_keywords",
        &["strategy", "decision", "plan", "roadmap", "vision"],
        &["strategy", "planning", "coordination"],
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    FinanceKeywords,
    SecurityKeywords,
    StrategyKeywords,
    Continuation,
    RegistryPriority,
    DefaultFirst,
}

impl ReasonCode {
    fn from_group(name: &str) -> ReasonCode {
        match name {
            "finance_keywords" => ReasonCode::FinanceKeywords,
            "security_keywords" => ReasonCode::SecurityKeywords,
            _ => ReasonCode::StrategyKeywords,
        }
    }
}

/// Audit record of one selection.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionRationale {
    pub chosen: String,
    pub reason: ReasonCode,
    /// Top three (agent, score) pairs, best first.
    pub top_scores: Vec<(String, f64)>,
}

/// Phase weight applied to each keyword group's score.
fn phase_weight(phase: MissionPhase, group: &str) -> f64 {
    match (phase, group) {
        (MissionPhase::Analysis, "finance_keywords") => 1.5,
        (MissionPhase::Strategy, "strategy_keywords") => 1.5,
        (MissionPhase::Execution, "security_keywords") => 1.3,
        (MissionPhase::Discovery, _) => 1.0,
        _ => 1.0,
    }
}

pub struct SpeakerSelector;

impl SpeakerSelector {
    /// Pick the next speaker. `previous_speaker` is penalized unless the
    /// message continues their thread (mentions them or their tags).
    pub fn select(
        message: &str,
        participants: &[Arc<AgentDescriptor>],
        phase: MissionPhase,
        previous_speaker: Option<&str>,
    ) -> Option<(Arc<AgentDescriptor>, SelectionRationale)> {
        if participants.is_empty() {
            return None;
        }
        let text = message.to_lowercase();

        let mut scored: Vec<(f64, ReasonCode, &Arc<AgentDescriptor>)> = participants
            .iter()
            .map(|agent| {
                let mut score = 0.0f64;
                let mut reason = ReasonCode::DefaultFirst;

                // (a) keyword/capability match, phase-weighted.
                for (group, keywords, tags) in KEYWORD_GROUPS {
                    let hits = keywords.iter().filter(|k| text.contains(*k)).count();
                    if hits == 0 {
                        continue;
                    }
                    let tag_match = tags.iter().any(|t| agent.has_tag(t));
                    if tag_match {
                        let gain = hits as f64 * phase_weight(phase, group);
                        if gain > 0.0 && score == 0.0 {
                            reason = ReasonCode::from_group(group);
                        }
                        score += gain;
                    }
                }

                // (b) registry priority pins.
                if REGISTRY_PRIORITY.contains(&agent.id.as_str()) {
                    score += 0.5;
                    if reason == ReasonCode::DefaultFirst {
                        reason = ReasonCode::RegistryPriority;
                    }
                }

                // (c) continuation vs repeat-speaker penalty.
                if previous_speaker == Some(agent.id.as_str()) {
                    let continues = text.contains(&agent.id)
                        || agent.capability_tags.iter().any(|t| text.contains(t.as_str()));
                    if continues {
                        score += 1.0;
                        reason = ReasonCode::Continuation;
                    } else {
                        score -= 1.0;
                    }
                }

                (score, reason, agent)
            })
            .collect();

        // (d) ties: lower cost tier first, then lexicographic id.
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.cost_tier.rank().cmp(&b.2.cost_tier.rank()))
                .then(a.2.id.cmp(&b.2.id))
        });

        let top_scores = scored
            .iter()
            .take(3)
            .map(|(score, _, agent)| (agent.id.clone(), *score))
            .collect();

        let (best_score, mut reason, best) = {
            let first = &scored[0];
            (first.0, first.1, first.2.clone())
        };
        // Nothing matched anywhere: the first participant answers.
        if best_score <= 0.0 {
            let fallback = participants[0].clone();
            reason = ReasonCode::DefaultFirst;
            return Some((
                fallback.clone(),
                SelectionRationale {
                    chosen: fallback.id.clone(),
                    reason,
                    top_scores,
                },
            ));
        }

        Some((
            best.clone(),
            SelectionRationale {
                chosen: best.id.clone(),
                reason,
                top_scores,
            },
        ))
    }
}
