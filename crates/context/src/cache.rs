//! Short-TTL cache keyed by (conversation, turn, agent, message hash).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub conversation_id: Uuid,
    pub turn_seq: u32,
    pub agent_id: String,
    pub message_hash: String,
}

struct CacheEntry {
    value: String,
    inserted_at: Instant,
}

pub struct ContextCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl ContextCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(e) if e.inserted_at.elapsed() < self.ttl => Some(e.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: CacheKey, value: String) {
        let mut entries = self.entries.lock();
        if entries.len() >= 4096 {
            let ttl = self.ttl;
            entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
        }
        entries.insert(key, CacheEntry { value, inserted_at: Instant::now() });
    }

    /// Drop all entries, or only one conversation's.
    pub fn clear(&self, conversation_id: Option<Uuid>) {
        let mut entries = self.entries.lock();
        match conversation_id {
            Some(id) => entries.retain(|k, _| k.conversation_id != id),
            None => entries.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(conv: Uuid, seq: u32) -> CacheKey {
        CacheKey {
            conversation_id: conv,
            turn_seq: seq,
            agent_id: "amy_cfo".into(),
            message_hash: "abc".into(),
        }
    }

    #[test]
    fn hit_within_ttl() {
        let cache = ContextCache::new(Duration::from_secs(60));
        let k = key(Uuid::new_v4(), 1);
        cache.put(k.clone(), "enhanced".into());
        assert_eq!(cache.get(&k).as_deref(), Some("enhanced"));
    }

    #[test]
    fn miss_after_ttl() {
        let cache = ContextCache::new(Duration::from_millis(5));
        let k = key(Uuid::new_v4(), 1);
        cache.put(k.clone(), "enhanced".into());
        std::thread::sleep(Duration::from_millis(15));
        assert!(cache.get(&k).is_none());
    }

    #[test]
    fn distinct_keys_do_not_collide() {
        let cache = ContextCache::new(Duration::from_secs(60));
        let conv = Uuid::new_v4();
        cache.put(key(conv, 1), "one".into());
        cache.put(key(conv, 2), "two".into());
        assert_eq!(cache.get(&key(conv, 1)).as_deref(), Some("one"));
        assert_eq!(cache.get(&key(conv, 2)).as_deref(), Some("two"));
    }

    #[test]
    fn clear_by_conversation() {
        let cache = ContextCache::new(Duration::from_secs(60));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        cache.put(key(a, 1), "a".into());
        cache.put(key(b, 1), "b".into());

        cache.clear(Some(a));
        assert!(cache.get(&key(a, 1)).is_none());
        assert!(cache.get(&key(b, 1)).is_some());

        cache.clear(None);
        assert!(cache.is_empty());
    }
}
