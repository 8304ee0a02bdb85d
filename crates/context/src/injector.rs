//! The per-turn context injector.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use orch_agents::AgentDescriptor;
use orch_domain::config::RagConfig;
use orch_domain::Result;
use orch_memory::{Fact, FactQuery, MemoryStore};

use crate::cache::{CacheKey, ContextCache};

/// The injector's product: the message the model actually sees, plus the
/// facts behind it for grounding measurement.
#[derive(Debug, Clone)]
pub struct EnhancedMessage {
    pub text: String,
    pub facts: Vec<Fact>,
    pub facts_injected: usize,
    pub history_injected: bool,
    pub from_cache: bool,
}

impl EnhancedMessage {
    fn passthrough(message: &str) -> Self {
        Self {
            text: message.to_string(),
            facts: Vec::new(),
            facts_injected: 0,
            history_injected: false,
            from_cache: false,
        }
    }
}

pub struct RagInjector {
    memory: Arc<dyn MemoryStore>,
    config: RagConfig,
    cache: ContextCache,
}

impl RagInjector {
    pub fn new(memory: Arc<dyn MemoryStore>, config: RagConfig) -> Self {
        let ttl = Duration::from_secs(config.cache_ttl_secs);
        Self { memory, config, cache: ContextCache::new(ttl) }
    }

    pub fn cache(&self) -> &ContextCache {
        &self.cache
    }

    /// Recency weight for a turn: early conversations lean on similarity,
    /// later ones weigh fresh facts higher.
    pub fn recency_weight(&self, turn_seq: u32) -> f64 {
        if turn_seq >= self.config.history_after_turn {
            self.config.late_recency_weight
        } else {
            self.config.early_recency_weight
        }
    }

    /// Build the enhanced message for one (conversation, turn, agent).
    ///
    /// The caller gates this behind the per-turn-RAG feature flag; when the
    /// flag is off it never calls here and the message passes unchanged.
    /// Within the cache TTL, identical inputs return the cached text and
    /// do not touch the memory store.
    pub async fn inject_context(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        agent: &AgentDescriptor,
        turn_seq: u32,
        message: &str,
        history: &[String],
    ) -> Result<EnhancedMessage> {
        if self.config.top_k == 0 {
            return Ok(EnhancedMessage::passthrough(message));
        }

        let key = CacheKey {
            conversation_id,
            turn_seq,
            agent_id: agent.id.clone(),
            message_hash: message_hash(message),
        };
        if let Some(cached) = self.cache.get(&key) {
            return Ok(EnhancedMessage {
                text: cached,
                facts: Vec::new(),
                facts_injected: 0,
                history_injected: false,
                from_cache: true,
            });
        }

        let mut facts = self
            .memory
            .query(FactQuery {
                user_id: user_id.to_string(),
                text: message.to_string(),
                k: self.config.top_k,
                threshold: self.config.similarity_threshold,
            })
            .await?;

        let weight = self.recency_weight(turn_seq);
        rank_facts(&mut facts, weight);

        let include_history = turn_seq >= self.config.history_after_turn && !history.is_empty();
        let text = render(message, &facts, agent, include_history.then(|| condense(history)));

        self.cache.put(key, text.clone());

        Ok(EnhancedMessage {
            facts_injected: facts.len(),
            history_injected: include_history,
            from_cache: false,
            text,
            facts,
        })
    }
}

/// Stable hash of the raw message for the cache key.
fn message_hash(message: &str) -> String {
    let digest = Sha256::digest(message.as_bytes());
    hex::encode(&digest[..8])
}

/// Order facts by similarity blended with recency rank.
fn rank_facts(facts: &mut [Fact], recency_weight: f64) {
    if facts.len() < 2 {
        return;
    }
    // Newest-first rank normalised to [0, 1].
    let mut by_age: Vec<Option<chrono::DateTime<chrono::Utc>>> =
        facts.iter().map(|f| f.created_at).collect();
    by_age.sort_by(|a, b| b.cmp(a));
    let recency_rank = |f: &Fact| -> f64 {
        match f.created_at {
            Some(t) => {
                let pos = by_age.iter().position(|x| *x == Some(t)).unwrap_or(0);
                1.0 - pos as f64 / (by_age.len().max(2) - 1) as f64
            }
            None => 0.0,
        }
    };
    let score =
        |f: &Fact| -> f64 { f.similarity * (1.0 - recency_weight) + recency_rank(f) * recency_weight };
    facts.sort_by(|a, b| score(b).partial_cmp(&score(a)).unwrap_or(std::cmp::Ordering::Equal));
}

/// A one-line-per-turn digest of recent history, oldest first.
fn condense(history: &[String]) -> String {
    const MAX_LINES: usize = 6;
    const MAX_LINE: usize = 120;
    history
        .iter()
        .rev()
        .take(MAX_LINES)
        .rev()
        .map(|line| {
            let mut line = line.replace('\n', " ");
            if line.len() > MAX_LINE {
                let mut end = MAX_LINE;
                while !line.is_char_boundary(end) {
                    end -= 1;
                }
                line.truncate(end);
                line.push_str("...");
            }
            format!("- {line}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Agent-specific focus hint derived from capability tags.
fn focus_hint(agent: &AgentDescriptor) -> String {
    for (tag, hint) in [
        ("finance", "Focus on the financial implications."),
        ("budget", "Focus on the financial implications."),
        ("security", "Focus on risk and compliance impact."),
        ("risk", "Focus on risk and compliance impact."),
        ("strategy", "Focus on strategic consequences and next decisions."),
    ] {
        if agent.has_tag(tag) {
            return hint.to_string();
        }
    }
    format!("Answer as {}.", agent.display_name)
}

fn render(
    message: &str,
    facts: &[Fact],
    agent: &AgentDescriptor,
    history: Option<String>,
) -> String {
    if facts.is_empty() && history.is_none() {
        return message.to_string();
    }

    let mut out = String::with_capacity(message.len() + 256);
    out.push_str(message);
    if !facts.is_empty() {
        out.push_str("\n\nRelevant Context:\n");
        for fact in facts {
            out.push_str("- ");
            out.push_str(&fact.content);
            out.push('\n');
        }
    }
    if let Some(h) = history {
        out.push_str("\nConversation so far:\n");
        out.push_str(&h);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(&focus_hint(agent));
    out
}
