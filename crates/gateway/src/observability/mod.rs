//! Structured events, metrics, and spans.
//!
//! The [`Observability`] handle is the process-wide [`EventSink`]: it
//! logs each event through `tracing`, feeds the metrics collector, and
//! mirrors the event onto the streaming hub's topics. Components hold it
//! as a capability handle and reference entities by id only.

pub mod metrics;

pub use metrics::MetricsCollector;

use std::sync::Arc;

use orch_domain::event::{EventName, EventSink, OrchEvent};

use crate::streaming::{topic, StreamingHub};

pub struct Observability {
    hub: Arc<StreamingHub>,
    metrics: Arc<MetricsCollector>,
}

impl Observability {
    pub fn new(hub: Arc<StreamingHub>, metrics: Arc<MetricsCollector>) -> Self {
        Self { hub, metrics }
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Events mirrored to `global:metrics` for dashboards.
    fn is_metrics_event(name: EventName) -> bool {
        matches!(
            name,
            EventName::CostTracked
                | EventName::BudgetEvent
                | EventName::BudgetWarning
                | EventName::BudgetExceeded
                | EventName::PricingFallback
                | EventName::PerformanceDegradation
                | EventName::ErrorOccurred
        )
    }
}

impl EventSink for Observability {
    fn emit(&self, event: OrchEvent) {
        tracing::debug!(
            event = event.name.as_str(),
            conversation = ?event.conversation_id,
            agent = event.agent_id.as_deref().unwrap_or(""),
            "event"
        );

        self.metrics.observe_event(&event);

        if let Some(conv) = event.conversation_id {
            self.hub.publish_event(&topic::conversation(conv), &event);
            if event.name == EventName::StreamingChunk {
                self.hub
                    .publish_event(&topic::conversation_stream(conv), &event);
            }
        }
        if Self::is_metrics_event(event.name) {
            self.hub.publish_event(&topic::global_metrics(), &event);
        }
    }
}
