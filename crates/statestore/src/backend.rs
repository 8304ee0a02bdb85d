//! The key-value backend contract.
//!
//! Semantics follow Redis: string values, lists with LRANGE-style ranges,
//! decimal counters, and per-key expiry. Every call either succeeds
//! atomically or surfaces `Error::Transient` (retry) / `Error::Conflict`
//! (type clash or concurrent-write conflict — reconcile).

use std::time::Duration;

use rust_decimal::Decimal;

use orch_domain::Result;

#[async_trait::async_trait]
pub trait KvBackend: Send + Sync + std::fmt::Debug {
    /// Read a string value. `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string value, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Write only if the key does not exist (SET NX). Returns false when
    /// the key was already present.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Remove a key of any type. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically add `delta` to a decimal counter, creating it at zero.
    /// Returns the new value.
    async fn incr_decimal(&self, key: &str, delta: Decimal, ttl: Option<Duration>) -> Result<Decimal>;

    /// Read a decimal counter; absent counters read as zero.
    async fn get_decimal(&self, key: &str) -> Result<Decimal>;

    /// Append to the tail of a list, creating it if needed. Returns the
    /// new length.
    async fn rpush(&self, key: &str, item: &str, ttl: Option<Duration>) -> Result<u64>;

    /// LRANGE semantics: inclusive bounds, negative indices count from the
    /// tail (-1 = last element).
    async fn lrange(&self, key: &str, lo: i64, hi: i64) -> Result<Vec<String>>;

    /// List length (0 for absent keys).
    async fn llen(&self, key: &str) -> Result<u64>;

    /// Reset the TTL of an existing key. Returns false when absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
}

/// Resolve a backend from a `REDIS_URL`-style selector.
///
/// `memory://` runs the in-process engine. A networked `redis://` client is
/// deployment glue wired in by the embedding application; the core only
/// requires these semantics.
pub fn from_url(url: &str) -> Result<std::sync::Arc<dyn KvBackend>> {
    match url.split("://").next() {
        Some("memory") => Ok(std::sync::Arc::new(crate::memory::MemoryBackend::new())),
        _ => Err(orch_domain::Error::Config(format!(
            "unsupported state backend url: {url} (expected memory://)"
        ))),
    }
}
