//! The `MemoryStore` trait plus the in-memory double.

use parking_lot::RwLock;

use orch_domain::Result;

use crate::types::{Fact, FactQuery};

/// Abstraction over the memory service. Implementations: REST client,
/// in-memory double.
#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    /// Top-k semantic retrieval for a user.
    async fn query(&self, query: FactQuery) -> Result<Vec<Fact>>;

    /// Store a new fact (fire-and-forget capture paths tolerate failure).
    async fn ingest(&self, user_id: &str, content: &str, source: Option<&str>) -> Result<()>;
}

/// Seeded in-memory store. Retrieval is naive keyword overlap — enough to
/// exercise the RAG pipeline deterministically in tests and demos.
#[derive(Default)]
pub struct StaticMemoryStore {
    facts: RwLock<Vec<(String, Fact)>>,
    query_count: std::sync::atomic::AtomicU64,
}

impl StaticMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, user_id: &str, content: &str, similarity: f64) {
        let mut facts = self.facts.write();
        let id = format!("seed-{}", facts.len());
        facts.push((
            user_id.to_string(),
            Fact {
                id: Some(id),
                content: content.to_string(),
                similarity,
                source: Some("seed".into()),
                created_at: Some(chrono::Utc::now()),
            },
        ));
    }

    /// How many queries hit the store (cache verification).
    pub fn query_count(&self) -> u64 {
        self.query_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn overlaps(text: &str, content: &str) -> bool {
        let needle = text.to_lowercase();
        let hay = content.to_lowercase();
        needle
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .any(|w| hay.contains(w))
    }
}

#[async_trait::async_trait]
impl MemoryStore for StaticMemoryStore {
    async fn query(&self, query: FactQuery) -> Result<Vec<Fact>> {
        self.query_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let facts = self.facts.read();
        let mut hits: Vec<Fact> = facts
            .iter()
            .filter(|(uid, f)| {
                uid == &query.user_id
                    && f.similarity >= query.threshold
                    && Self::overlaps(&query.text, &f.content)
            })
            .map(|(_, f)| f.clone())
            .collect();
        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(query.k as usize);
        Ok(hits)
    }

    async fn ingest(&self, user_id: &str, content: &str, source: Option<&str>) -> Result<()> {
        self.facts.write().push((
            user_id.to_string(),
            Fact {
                id: None,
                content: content.to_string(),
                similarity: 1.0,
                source: source.map(String::from),
                created_at: Some(chrono::Utc::now()),
            },
        ));
        Ok(())
    }
}
