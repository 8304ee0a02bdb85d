//! In-process metrics: counters, summary histograms, gauges.
//!
//! Exporters are out of scope; the collector snapshots to JSON for the
//! admin API and the `global:metrics` stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use orch_domain::event::{EventName, OrchEvent};

/// Count / sum / min / max summary (no buckets).
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl HistogramSummary {
    fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum / self.count as f64 }
    }
}

#[derive(Default)]
pub struct MetricsCollector {
    // Counters.
    conversations_total: AtomicU64,
    agent_invocations_total: AtomicU64,
    tool_calls_total: AtomicU64,
    errors_total: AtomicU64,

    // Gauges.
    active_conversations: AtomicI64,
    budget_remaining: RwLock<f64>,
    memory_usage_bytes: AtomicU64,

    // Histograms.
    histograms: RwLock<HashMap<&'static str, HistogramSummary>>,
}

pub const H_CONVERSATION_DURATION: &str = "conversation_duration";
pub const H_AGENT_RESPONSE_TIME: &str = "agent_response_time";
pub const H_COST_PER_TURN: &str = "cost_per_turn";
pub const H_TOKENS_PER_TURN: &str = "tokens_per_turn";

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter updates driven directly by events.
    pub fn observe_event(&self, event: &OrchEvent) {
        match event.name {
            EventName::ConversationStart => {
                self.conversations_total.fetch_add(1, Ordering::Relaxed);
                self.active_conversations.fetch_add(1, Ordering::Relaxed);
            }
            EventName::ConversationEnd => {
                self.active_conversations.fetch_sub(1, Ordering::Relaxed);
            }
            EventName::AgentInvocation => {
                self.agent_invocations_total.fetch_add(1, Ordering::Relaxed);
            }
            EventName::ToolInvoked => {
                self.tool_calls_total.fetch_add(1, Ordering::Relaxed);
            }
            EventName::ErrorOccurred => {
                self.errors_total.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn record_histogram(&self, name: &'static str, value: f64) {
        self.histograms.write().entry(name).or_default().record(value);
    }

    pub fn set_budget_remaining(&self, value: f64) {
        *self.budget_remaining.write() = value;
    }

    pub fn set_memory_usage_bytes(&self, value: u64) {
        self.memory_usage_bytes.store(value, Ordering::Relaxed);
    }

    pub fn histogram(&self, name: &str) -> Option<HistogramSummary> {
        self.histograms.read().get(name).cloned()
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let histograms: HashMap<String, HistogramSummary> = self
            .histograms
            .read()
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        serde_json::json!({
            "counters": {
                "conversations_total": self.conversations_total.load(Ordering::Relaxed),
                "agent_invocations_total": self.agent_invocations_total.load(Ordering::Relaxed),
                "tool_calls_total": self.tool_calls_total.load(Ordering::Relaxed),
                "errors_total": self.errors_total.load(Ordering::Relaxed),
            },
            "gauges": {
                "active_conversations": self.active_conversations.load(Ordering::Relaxed),
                "budget_remaining": *self.budget_remaining.read(),
                "memory_usage_bytes": self.memory_usage_bytes.load(Ordering::Relaxed),
            },
            "histograms": histograms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_driven_counters() {
        let m = MetricsCollector::new();
        m.observe_event(&OrchEvent::new(EventName::ConversationStart));
        m.observe_event(&OrchEvent::new(EventName::AgentInvocation));
        m.observe_event(&OrchEvent::new(EventName::AgentInvocation));
        m.observe_event(&OrchEvent::new(EventName::ToolInvoked));
        m.observe_event(&OrchEvent::new(EventName::ErrorOccurred));
        m.observe_event(&OrchEvent::new(EventName::ConversationEnd));

        let snap = m.snapshot();
        assert_eq!(snap["counters"]["conversations_total"], 1);
        assert_eq!(snap["counters"]["agent_invocations_total"], 2);
        assert_eq!(snap["counters"]["tool_calls_total"], 1);
        assert_eq!(snap["counters"]["errors_total"], 1);
        assert_eq!(snap["gauges"]["active_conversations"], 0);
    }

    #[test]
    fn histogram_summary() {
        let m = MetricsCollector::new();
        m.record_histogram(H_COST_PER_TURN, 0.01);
        m.record_histogram(H_COST_PER_TURN, 0.03);
        let h = m.histogram(H_COST_PER_TURN).unwrap();
        assert_eq!(h.count, 2);
        assert!((h.mean() - 0.02).abs() < 1e-9);
        assert!((h.min - 0.01).abs() < 1e-9);
        assert!((h.max - 0.03).abs() < 1e-9);
    }

    #[test]
    fn gauges_settable() {
        let m = MetricsCollector::new();
        m.set_budget_remaining(42.5);
        m.set_memory_usage_bytes(1024);
        let snap = m.snapshot();
        assert_eq!(snap["gauges"]["budget_remaining"], 42.5);
        assert_eq!(snap["gauges"]["memory_usage_bytes"], 1024);
    }
}
