//! In-process backend with Redis value semantics.
//!
//! Strings, lists, and decimal counters live in one keyspace; a key holds
//! exactly one type and cross-type operations fail with `Error::Conflict`
//! (the WRONGTYPE discipline). Expiry is lazy on access plus an explicit
//! [`MemoryBackend::sweep`] for long-lived processes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rust_decimal::Decimal;

use orch_domain::{Error, Result};

use crate::backend::KvBackend;

#[derive(Debug)]
enum Value {
    Str(String),
    List(Vec<String>),
    Counter(Decimal),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Counter(_) => "counter",
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// The in-process engine. All operations are atomic under one mutex; the
/// critical sections are tiny (no I/O, no allocation-heavy work).
#[derive(Debug)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Drop every expired entry. Called opportunistically by the runtime.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn wrong_type(key: &str, found: &'static str, wanted: &'static str) -> Error {
        Error::Conflict(format!("key {key}: holds {found}, operation expects {wanted}"))
    }
}

/// Fetch a live entry, dropping it when expired.
fn live<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
        return None;
    }
    entries.get_mut(key)
}

#[async_trait::async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match live(&mut entries, key, now) {
            None => Ok(None),
            Some(e) => match &e.value {
                Value::Str(s) => Ok(Some(s.clone())),
                other => Err(Self::wrong_type(key, other.type_name(), "string")),
            },
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if live(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|d| now + d),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.remove(key) {
            Some(e) => Ok(!e.is_expired(now)),
            None => Ok(false),
        }
    }

    async fn incr_decimal(&self, key: &str, delta: Decimal, ttl: Option<Duration>) -> Result<Decimal> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match live(&mut entries, key, now) {
            Some(e) => match &mut e.value {
                Value::Counter(v) => {
                    *v += delta;
                    Ok(*v)
                }
                other => Err(Self::wrong_type(key, other.type_name(), "counter")),
            },
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Counter(delta),
                        expires_at: ttl.map(|d| now + d),
                    },
                );
                Ok(delta)
            }
        }
    }

    async fn get_decimal(&self, key: &str) -> Result<Decimal> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match live(&mut entries, key, now) {
            None => Ok(Decimal::ZERO),
            Some(e) => match &e.value {
                Value::Counter(v) => Ok(*v),
                other => Err(Self::wrong_type(key, other.type_name(), "counter")),
            },
        }
    }

    async fn rpush(&self, key: &str, item: &str, ttl: Option<Duration>) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match live(&mut entries, key, now) {
            Some(e) => match &mut e.value {
                Value::List(items) => {
                    items.push(item.to_string());
                    Ok(items.len() as u64)
                }
                other => Err(Self::wrong_type(key, other.type_name(), "list")),
            },
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::List(vec![item.to_string()]),
                        expires_at: ttl.map(|d| now + d),
                    },
                );
                Ok(1)
            }
        }
    }

    async fn lrange(&self, key: &str, lo: i64, hi: i64) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match live(&mut entries, key, now) {
            None => Ok(Vec::new()),
            Some(e) => match &e.value {
                Value::List(items) => {
                    let len = items.len() as i64;
                    let norm = |i: i64| -> i64 {
                        if i < 0 { (len + i).max(0) } else { i.min(len) }
                    };
                    let start = norm(lo);
                    let end = norm(hi).min(len - 1);
                    if len == 0 || start > end {
                        return Ok(Vec::new());
                    }
                    Ok(items[start as usize..=(end as usize)].to_vec())
                }
                other => Err(Self::wrong_type(key, other.type_name(), "list")),
            },
        }
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match live(&mut entries, key, now) {
            None => Ok(0),
            Some(e) => match &e.value {
                Value::List(items) => Ok(items.len() as u64),
                other => Err(Self::wrong_type(key, other.type_name(), "list")),
            },
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match live(&mut entries, key, now) {
            Some(e) => {
                e.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn set_get_delete() {
        let kv = MemoryBackend::new();
        kv.set("a", "1", None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(kv.delete("a").await.unwrap());
        assert_eq!(kv.get("a").await.unwrap(), None);
        assert!(!kv.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn set_nx_only_first_wins() {
        let kv = MemoryBackend::new();
        assert!(kv.set_nx("k", "first", None).await.unwrap());
        assert!(!kv.set_nx("k", "second", None).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn counter_accumulates_decimals() {
        let kv = MemoryBackend::new();
        let d = |s: &str| Decimal::from_str(s).unwrap();
        assert_eq!(kv.incr_decimal("c", d("0.1"), None).await.unwrap(), d("0.1"));
        assert_eq!(kv.incr_decimal("c", d("0.2"), None).await.unwrap(), d("0.3"));
        assert_eq!(kv.get_decimal("c").await.unwrap(), d("0.3"));
        // Absent counters read as zero.
        assert_eq!(kv.get_decimal("ghost").await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn list_push_and_ranges() {
        let kv = MemoryBackend::new();
        for item in ["a", "b", "c", "d"] {
            kv.rpush("l", item, None).await.unwrap();
        }
        assert_eq!(kv.llen("l").await.unwrap(), 4);
        assert_eq!(kv.lrange("l", 0, -1).await.unwrap(), vec!["a", "b", "c", "d"]);
        assert_eq!(kv.lrange("l", 1, 2).await.unwrap(), vec!["b", "c"]);
        assert_eq!(kv.lrange("l", -2, -1).await.unwrap(), vec!["c", "d"]);
        assert!(kv.lrange("l", 3, 1).await.unwrap().is_empty());
        assert!(kv.lrange("ghost", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn wrong_type_is_conflict() {
        let kv = MemoryBackend::new();
        kv.set("s", "text", None).await.unwrap();
        let err = kv.rpush("s", "x", None).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
        let err = kv.incr_decimal("s", Decimal::ONE, None).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn ttl_expires_keys() {
        let kv = MemoryBackend::new();
        kv.set("t", "v", Some(Duration::from_millis(10))).await.unwrap();
        assert!(kv.get("t").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(kv.get("t").await.unwrap(), None);
        // Expired key can be re-created with set_nx.
        assert!(kv.set_nx("t", "v2", None).await.unwrap());
    }

    #[tokio::test]
    async fn expire_resets_ttl() {
        let kv = MemoryBackend::new();
        kv.set("t", "v", Some(Duration::from_millis(10))).await.unwrap();
        assert!(kv.expire("t", Duration::from_secs(60)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(kv.get("t").await.unwrap().is_some());
        assert!(!kv.expire("ghost", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn sweep_drops_expired() {
        let kv = MemoryBackend::new();
        kv.set("a", "1", Some(Duration::from_millis(5))).await.unwrap();
        kv.set("b", "2", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(kv.sweep(), 1);
        assert_eq!(kv.len(), 1);
    }
}
