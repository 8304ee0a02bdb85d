//! The high-level state surface used by the runtime.
//!
//! Persisted state is the source of truth; the read cache here is a
//! derived view used only when the backend is unavailable, and every such
//! read is flagged stale.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use orch_domain::config::StateConfig;
use orch_domain::convo::{Conversation, Turn};
use orch_domain::{Error, Money, Result};

use crate::backend::KvBackend;
use crate::keys;

/// Retry parameters for transient backend failures. Writes are attempted
/// a bounded number of times, then the error surfaces to the caller.
const TRANSIENT_ATTEMPTS: u32 = 3;
const TRANSIENT_BACKOFF: Duration = Duration::from_millis(25);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TTL bundle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy)]
pub struct StoreTtls {
    /// Conversation-scoped keys (conversation record, turn list, counters).
    pub conversation: Duration,
    /// Daily cost aggregates.
    pub daily_aggregate: Duration,
    /// Per-turn detail records.
    pub turn_detail: Duration,
}

impl From<&StateConfig> for StoreTtls {
    fn from(c: &StateConfig) -> Self {
        Self {
            conversation: Duration::from_secs(c.conversation_ttl_secs),
            daily_aggregate: Duration::from_secs(c.daily_aggregate_ttl_secs),
            turn_detail: Duration::from_secs(c.turn_detail_ttl_secs),
        }
    }
}

impl Default for StoreTtls {
    fn default() -> Self {
        Self {
            conversation: Duration::from_secs(3600),
            daily_aggregate: Duration::from_secs(7 * 24 * 3600),
            turn_detail: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// A read served from the local cache while the backend was unreachable.
#[derive(Debug, Clone)]
pub struct StaleRead<T> {
    pub value: T,
    pub stale: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StateStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct StateStore {
    kv: Arc<dyn KvBackend>,
    ttls: StoreTtls,
    /// Last-known-good conversation payloads, for stale reads only.
    read_cache: Mutex<HashMap<String, (String, Instant)>>,
}

impl StateStore {
    pub fn new(kv: Arc<dyn KvBackend>, ttls: StoreTtls) -> Self {
        Self { kv, ttls, read_cache: Mutex::new(HashMap::new()) }
    }

    pub fn ttls(&self) -> StoreTtls {
        self.ttls
    }

    pub fn backend(&self) -> Arc<dyn KvBackend> {
        self.kv.clone()
    }

    /// Retry a transient-failing operation a bounded number of times.
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_retryable() && attempt + 1 < TRANSIENT_ATTEMPTS => {
                    attempt += 1;
                    tokio::time::sleep(TRANSIENT_BACKOFF * attempt).await;
                }
                other => return other,
            }
        }
    }

    // ── Conversations ────────────────────────────────────────────────

    /// Create a new conversation record. Fails with `Conflict` when the id
    /// already exists.
    pub async fn create_conversation(&self, conv: &Conversation) -> Result<()> {
        let key = keys::conv(conv.id);
        let json = serde_json::to_string(conv)?;
        let created = self
            .with_retry(|| self.kv.set_nx(&key, &json, Some(self.ttls.conversation)))
            .await?;
        if !created {
            return Err(Error::Conflict(format!("conversation {} already exists", conv.id)));
        }
        self.cache_put(&key, &json);
        Ok(())
    }

    pub async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let key = keys::conv(id);
        let raw = self.with_retry(|| self.kv.get(&key)).await?;
        match raw {
            Some(json) => {
                self.cache_put(&key, &json);
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    /// Read a conversation, falling back to the last-known-good copy (with
    /// an explicit staleness flag) when the backend is unreachable.
    pub async fn get_conversation_stale_ok(&self, id: Uuid) -> Result<Option<StaleRead<Conversation>>> {
        let key = keys::conv(id);
        match self.with_retry(|| self.kv.get(&key)).await {
            Ok(Some(json)) => {
                self.cache_put(&key, &json);
                Ok(Some(StaleRead { value: serde_json::from_str(&json)?, stale: false }))
            }
            Ok(None) => Ok(None),
            Err(e) if e.is_retryable() => match self.cache_get(&key) {
                Some(json) => {
                    tracing::warn!(conversation = %id, "serving stale conversation read");
                    Ok(Some(StaleRead { value: serde_json::from_str(&json)?, stale: true }))
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Read-modify-write a conversation. The patch runs on the current
    /// persisted value; absent conversations are a conflict.
    pub async fn update_conversation<F>(&self, id: Uuid, patch: F) -> Result<Conversation>
    where
        F: FnOnce(&mut Conversation),
    {
        let mut conv = self
            .get_conversation(id)
            .await?
            .ok_or_else(|| Error::Conflict(format!("conversation {id} not found")))?;
        patch(&mut conv);
        conv.updated_at = chrono::Utc::now();
        let key = keys::conv(id);
        let json = serde_json::to_string(&conv)?;
        self.with_retry(|| self.kv.set(&key, &json, Some(self.ttls.conversation)))
            .await?;
        self.cache_put(&key, &json);
        Ok(conv)
    }

    pub async fn delete_conversation(&self, id: Uuid) -> Result<bool> {
        let key = keys::conv(id);
        let existed = self.with_retry(|| self.kv.delete(&key)).await?;
        self.kv.delete(&keys::turnlist(id)).await?;
        self.kv.delete(&keys::cost_conv(id)).await?;
        self.kv.delete(&keys::cost_records(id)).await?;
        self.read_cache.lock().remove(&keys::conv(id));
        Ok(existed)
    }

    // ── Turns ────────────────────────────────────────────────────────

    /// Persist a sealed turn: detail record plus turn-list entry. The turn
    /// sequence must extend the list densely (len + 1), otherwise the
    /// caller raced another writer and gets a conflict.
    pub async fn append_turn(&self, turn: &Turn) -> Result<()> {
        let list_key = keys::turnlist(turn.conversation_id);
        let current = self.with_retry(|| self.kv.llen(&list_key)).await?;
        if u64::from(turn.seq) != current + 1 {
            return Err(Error::Conflict(format!(
                "turn seq {} does not extend list of length {current}",
                turn.seq
            )));
        }

        let json = serde_json::to_string(turn)?;
        let detail_key = keys::turn(turn.conversation_id, turn.seq);
        self.with_retry(|| self.kv.set(&detail_key, &json, Some(self.ttls.turn_detail)))
            .await?;
        let seq_str = turn.seq.to_string();
        self.with_retry(|| self.kv.rpush(&list_key, &seq_str, Some(self.ttls.conversation)))
            .await?;
        Ok(())
    }

    pub async fn get_turn(&self, conv_id: Uuid, seq: u32) -> Result<Option<Turn>> {
        let key = keys::turn(conv_id, seq);
        let raw = self
            .with_retry(|| self.kv.get(&key))
            .await?;
        Ok(match raw {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    /// List turns by sequence range (inclusive, 1-based). `None` bounds
    /// mean "from the start" / "to the end".
    pub async fn list_turns(&self, conv_id: Uuid, lo: Option<u32>, hi: Option<u32>) -> Result<Vec<Turn>> {
        let list_key = keys::turnlist(conv_id);
        let seqs = self
            .with_retry(|| self.kv.lrange(&list_key, 0, -1))
            .await?;
        let mut turns = Vec::new();
        for seq_str in seqs {
            let seq: u32 = seq_str
                .parse()
                .map_err(|_| Error::Internal(format!("corrupt turnlist entry: {seq_str}")))?;
            if lo.is_some_and(|l| seq < l) || hi.is_some_and(|h| seq > h) {
                continue;
            }
            if let Some(turn) = self.get_turn(conv_id, seq).await? {
                turns.push(turn);
            }
        }
        Ok(turns)
    }

    pub async fn turn_count(&self, conv_id: Uuid) -> Result<u64> {
        let key = keys::turnlist(conv_id);
        self.with_retry(|| self.kv.llen(&key)).await
    }

    // ── Counters & generic keys ──────────────────────────────────────

    /// Add to the daily cost counter; returns the new total.
    pub async fn incr_daily_cost(&self, date: NaiveDate, delta: Money) -> Result<Money> {
        let key = keys::cost_daily(date);
        let v = self
            .with_retry(|| {
                self.kv.incr_decimal(&key, delta.as_decimal(), Some(self.ttls.daily_aggregate))
            })
            .await?;
        Ok(Money::new(v))
    }

    pub async fn get_daily_cost(&self, date: NaiveDate) -> Result<Money> {
        let key = keys::cost_daily(date);
        let v = self.with_retry(|| self.kv.get_decimal(&key)).await?;
        Ok(Money::new(v))
    }

    /// Add to a conversation's cost counter; returns the new total.
    pub async fn incr_conversation_cost(&self, conv_id: Uuid, delta: Money) -> Result<Money> {
        let key = keys::cost_conv(conv_id);
        let v = self
            .with_retry(|| {
                self.kv.incr_decimal(&key, delta.as_decimal(), Some(self.ttls.conversation))
            })
            .await?;
        Ok(Money::new(v))
    }

    pub async fn get_conversation_cost(&self, conv_id: Uuid) -> Result<Money> {
        let key = keys::cost_conv(conv_id);
        let v = self
            .with_retry(|| self.kv.get_decimal(&key))
            .await?;
        Ok(Money::new(v))
    }

    pub async fn incr_counter(&self, key: &str, delta: Decimal, ttl: Option<Duration>) -> Result<Decimal> {
        self.with_retry(|| self.kv.incr_decimal(key, delta, ttl)).await
    }

    pub async fn get_counter(&self, key: &str) -> Result<Decimal> {
        self.with_retry(|| self.kv.get_decimal(key)).await
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.with_retry(|| self.kv.set(key, value, Some(ttl))).await
    }

    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.with_retry(|| self.kv.get(key)).await
    }

    pub async fn push_list(&self, key: &str, item: &str, ttl: Option<Duration>) -> Result<u64> {
        self.with_retry(|| self.kv.rpush(key, item, ttl)).await
    }

    pub async fn range_list(&self, key: &str, lo: i64, hi: i64) -> Result<Vec<String>> {
        self.with_retry(|| self.kv.lrange(key, lo, hi)).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.with_retry(|| self.kv.delete(key)).await
    }

    // ── Read cache ───────────────────────────────────────────────────

    fn cache_put(&self, key: &str, json: &str) {
        let mut cache = self.read_cache.lock();
        if cache.len() > 10_000 {
            cache.clear();
        }
        cache.insert(key.to_string(), (json.to_string(), Instant::now()));
    }

    fn cache_get(&self, key: &str) -> Option<String> {
        self.read_cache.lock().get(key).map(|(json, _)| json.clone())
    }
}
