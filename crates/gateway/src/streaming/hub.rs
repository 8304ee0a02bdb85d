//! The streaming hub.
//!
//! Topics: `conv:{id}` (every event of a conversation), `conv:{id}:stream`
//! (chunks only), `global:metrics`. Delivery is at-most-once per
//! subscriber with a bounded buffer; a full buffer drops the subscriber
//! (never stalls the publisher) and the remaining subscribers see a
//! `slow_consumer` record. Every frame on a topic carries a monotonically
//! increasing `seq`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use orch_domain::event::OrchEvent;

/// A delivered stream record: `{type, seq, timestamp, ...payload}`.
pub type Frame = Arc<serde_json::Value>;

/// Topic name builders.
pub mod topic {
    use uuid::Uuid;

    pub fn conversation(id: Uuid) -> String {
        format!("conv:{id}")
    }

    pub fn conversation_stream(id: Uuid) -> String {
        format!("conv:{id}:stream")
    }

    pub fn global_metrics() -> String {
        "global:metrics".to_string()
    }
}

pub struct Subscription {
    pub rx: mpsc::Receiver<Frame>,
    pub subscriber_id: u64,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Frame>,
}

#[derive(Default)]
struct Topic {
    seq: u64,
    subscribers: Vec<Subscriber>,
}

pub struct StreamingHub {
    buffer: usize,
    next_subscriber_id: Mutex<u64>,
    topics: Mutex<HashMap<String, Topic>>,
}

impl StreamingHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            next_subscriber_id: Mutex::new(0),
            topics: Mutex::new(HashMap::new()),
        }
    }

    // ── Subscribe ────────────────────────────────────────────────────

    /// Join a topic. The first delivered frame is `connection_established`.
    pub fn subscribe(&self, topic_name: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let subscriber_id = {
            let mut next = self.next_subscriber_id.lock();
            *next += 1;
            *next
        };

        let mut topics = self.topics.lock();
        let topic = topics.entry(topic_name.to_string()).or_default();
        topic.seq += 1;
        let hello = Arc::new(serde_json::json!({
            "type": "connection_established",
            "topic": topic_name,
            "seq": topic.seq,
            "timestamp": chrono::Utc::now(),
        }));
        // Buffer is at least 1, so the greeting always fits.
        let _ = tx.try_send(hello);
        topic.subscribers.push(Subscriber { id: subscriber_id, tx });

        Subscription { rx, subscriber_id }
    }

    pub fn unsubscribe(&self, topic_name: &str, subscriber_id: u64) {
        let mut topics = self.topics.lock();
        if let Some(topic) = topics.get_mut(topic_name) {
            topic.subscribers.retain(|s| s.id != subscriber_id);
        }
    }

    pub fn subscriber_count(&self, topic_name: &str) -> usize {
        self.topics
            .lock()
            .get(topic_name)
            .map_or(0, |t| t.subscribers.len())
    }

    pub fn active_topics(&self) -> Vec<String> {
        self.topics.lock().keys().cloned().collect()
    }

    // ── Publish ──────────────────────────────────────────────────────

    /// Publish an observability event to a topic.
    pub fn publish_event(&self, topic_name: &str, event: &OrchEvent) {
        let value = match serde_json::to_value(event) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "unserializable event dropped");
                return;
            }
        };
        self.deliver(topic_name, value);
    }

    /// Publish a stream-control record (`heartbeat`, `final`, ...).
    pub fn publish_control(
        &self,
        topic_name: &str,
        kind: &str,
        conversation_id: Option<Uuid>,
        payload: serde_json::Value,
    ) {
        let mut value = serde_json::json!({
            "type": kind,
            "timestamp": chrono::Utc::now(),
        });
        if let Some(id) = conversation_id {
            value["conversationID"] = serde_json::json!(id);
        }
        if let serde_json::Value::Object(extra) = payload {
            for (k, v) in extra {
                value[k] = v;
            }
        }
        self.deliver(topic_name, value);
    }

    /// Heartbeat every active topic (idle keep-alive).
    pub fn heartbeat_all(&self) {
        for topic_name in self.active_topics() {
            self.publish_control(&topic_name, "heartbeat", None, serde_json::json!({}));
        }
    }

    /// Publish the terminal `final` record on a conversation's topics and
    /// drop them. The `final` seq is greater than every prior frame on
    /// each topic.
    pub fn finish_conversation(&self, conversation_id: Uuid, status: &str) {
        for topic_name in [
            topic::conversation(conversation_id),
            topic::conversation_stream(conversation_id),
        ] {
            self.publish_control(
                &topic_name,
                "final",
                Some(conversation_id),
                serde_json::json!({ "status": status }),
            );
            self.topics.lock().remove(&topic_name);
        }
    }

    fn deliver(&self, topic_name: &str, mut value: serde_json::Value) {
        let mut topics = self.topics.lock();
        let topic = topics.entry(topic_name.to_string()).or_default();
        topic.seq += 1;
        value["seq"] = serde_json::json!(topic.seq);
        let frame: Frame = Arc::new(value);

        let mut dropped: Vec<u64> = Vec::new();
        topic.subscribers.retain(|sub| match sub.tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                dropped.push(sub.id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if !dropped.is_empty() {
            tracing::warn!(topic = topic_name, count = dropped.len(), "dropped slow subscribers");
            topic.seq += 1;
            let notice: Frame = Arc::new(serde_json::json!({
                "type": "slow_consumer",
                "topic": topic_name,
                "droppedSubscribers": dropped.len(),
                "seq": topic.seq,
                "timestamp": chrono::Utc::now(),
            }));
            topic
                .subscribers
                .retain(|sub| sub.tx.try_send(notice.clone()).is_ok());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_domain::event::EventName;

    fn hub() -> StreamingHub {
        StreamingHub::new(8)
    }

    fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(f) = rx.try_recv() {
            frames.push((*f).clone());
        }
        frames
    }

    #[test]
    fn subscriber_greeted_then_receives_in_order() {
        let hub = hub();
        let conv = Uuid::new_v4();
        let t = topic::conversation(conv);
        let mut sub = hub.subscribe(&t);

        hub.publish_event(&t, &OrchEvent::new(EventName::ConversationStart).conversation(conv));
        hub.publish_event(&t, &OrchEvent::new(EventName::StreamingChunk).conversation(conv));

        let frames = drain(&mut sub.rx);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0]["type"], "connection_established");
        assert_eq!(frames[1]["type"], "conversation.start");
        assert_eq!(frames[2]["type"], "streaming.chunk");

        // Strictly increasing seq.
        let seqs: Vec<u64> = frames.iter().map(|f| f["seq"].as_u64().unwrap()).collect();
        assert!(seqs.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn final_has_greatest_seq_and_closes_topic() {
        let hub = hub();
        let conv = Uuid::new_v4();
        let t = topic::conversation(conv);
        let mut sub = hub.subscribe(&t);

        for _ in 0..3 {
            hub.publish_event(&t, &OrchEvent::new(EventName::StreamingChunk).conversation(conv));
        }
        hub.finish_conversation(conv, "completed");

        let frames = drain(&mut sub.rx);
        let final_frame = frames.last().unwrap();
        assert_eq!(final_frame["type"], "final");
        assert_eq!(final_frame["status"], "completed");
        let max_prior = frames[..frames.len() - 1]
            .iter()
            .map(|f| f["seq"].as_u64().unwrap())
            .max()
            .unwrap();
        assert!(final_frame["seq"].as_u64().unwrap() > max_prior);

        assert_eq!(hub.subscriber_count(&t), 0);
    }

    #[test]
    fn slow_subscriber_is_dropped_not_blocking() {
        let hub = StreamingHub::new(2);
        let t = "conv:slow";
        let mut slow = hub.subscribe(t);
        let mut fast = hub.subscribe(t);

        // Fill both buffers (greeting + one chunk), then keep the fast
        // subscriber drained while the slow one never reads.
        hub.publish_event(t, &OrchEvent::new(EventName::StreamingChunk));
        assert_eq!(drain(&mut fast.rx).len(), 2);

        // Slow buffer is full now; this publish drops the slow subscriber.
        hub.publish_event(t, &OrchEvent::new(EventName::StreamingChunk));
        assert_eq!(hub.subscriber_count(t), 1);

        // The fast subscriber sees the chunk and the slow_consumer notice.
        let frames = drain(&mut fast.rx);
        assert!(frames.iter().any(|f| f["type"] == "slow_consumer"));

        // The slow subscriber's channel holds only what fit before the drop.
        assert_eq!(drain(&mut slow.rx).len(), 2);
    }

    #[test]
    fn unsubscribe_removes() {
        let hub = hub();
        let sub = hub.subscribe("conv:x");
        assert_eq!(hub.subscriber_count("conv:x"), 1);
        hub.unsubscribe("conv:x", sub.subscriber_id);
        assert_eq!(hub.subscriber_count("conv:x"), 0);
    }

    #[test]
    fn heartbeat_reaches_active_topics() {
        let hub = hub();
        let mut sub = hub.subscribe("conv:hb");
        hub.heartbeat_all();
        let frames = drain(&mut sub.rx);
        assert!(frames.iter().any(|f| f["type"] == "heartbeat"));
    }

    #[test]
    fn publish_to_topic_without_subscribers_is_fine() {
        let hub = hub();
        hub.publish_event("conv:empty", &OrchEvent::new(EventName::StreamingChunk));
        // Seq continues for later subscribers.
        let mut sub = hub.subscribe("conv:empty");
        let frames = drain(&mut sub.rx);
        assert_eq!(frames[0]["seq"].as_u64().unwrap(), 2);
    }
}
