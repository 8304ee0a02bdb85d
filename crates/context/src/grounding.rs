//! Grounding metrics: did the model actually use what we injected?
//!
//! Detection is keyword substring matching — crude but cheap, and stable
//! enough to compare RAG-on against RAG-off runs.

use orch_memory::Fact;

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "being", "could", "every", "from", "have", "into", "more",
    "other", "should", "since", "than", "that", "their", "there", "these", "they", "this",
    "were", "what", "when", "where", "which", "while", "will", "with", "would", "your",
];

/// Lowercased content words (length > 3, no stopwords), deduplicated,
/// order preserved.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3 && !STOPWORDS.contains(w))
        .filter(|w| seen.insert(w.to_string()))
        .map(String::from)
        .collect()
}

/// Fraction of `keywords` present in `text` (substring match, case-folded).
pub fn coverage(text: &str, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let hay = text.to_lowercase();
    let hits = keywords.iter().filter(|k| hay.contains(k.as_str())).count();
    hits as f64 / keywords.len() as f64
}

/// Share of a fact's keywords that must appear in the output before the
/// fact counts as referenced. Incidental single-word overlap with the
/// question stays below this.
const REFERENCE_THRESHOLD: f64 = 0.3;

/// Whether enough of `fact`'s keywords appear in the output.
pub fn fact_referenced(fact: &Fact, output: &str) -> bool {
    let keywords = extract_keywords(&fact.content);
    if keywords.is_empty() {
        return false;
    }
    coverage(output, &keywords) >= REFERENCE_THRESHOLD
}

/// Facts referenced / facts provided, in [0, 1]. Zero facts scores zero.
pub fn grounding_score(facts: &[Fact], output: &str) -> f64 {
    if facts.is_empty() {
        return 0.0;
    }
    let referenced = facts.iter().filter(|f| fact_referenced(f, output)).count();
    referenced as f64 / facts.len() as f64
}
