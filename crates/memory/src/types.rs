//! Wire shapes for the memory service. Field names are `camelCase` on the
//! wire, `snake_case` in Rust.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One retrieved fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
    /// Similarity to the query in [0, 1].
    #[serde(default)]
    pub similarity: f64,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A top-k retrieval request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactQuery {
    pub user_id: String,
    pub text: String,
    pub k: u32,
    /// Minimum similarity for a hit to be returned.
    pub threshold: f64,
}

/// POST /api/facts/query — response body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactQueryResponse {
    #[serde(default)]
    pub facts: Vec<Fact>,
}

/// POST /api/facts — request body (ingest).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactIngest {
    pub user_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}
